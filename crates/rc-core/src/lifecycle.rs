//! # Consent Lifecycle Manager
//!
//! Orchestrates create → validate → encode → persist → supersede, plus revoke,
//! verify, and the read-side queries. It is the only component that asks a
//! store to change a record's status.
//!
//! Per (site, user): `NoRecord → Valid → {Superseded, Revoked}`. Terminal
//! records stay terminal; a new `Valid` record can always be created.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::{ConsentError, Result};
use crate::models::{
    AuditAction, AuditEvent, ConsentRecord, ConsentStatus, DecisionMetadata, Identifier,
    RequestMetadata, SubjectKey, Validity,
};
use crate::registry::RegistrySnapshot;
use crate::traits::{AuditSink, ConsentStore, RegistryProvider};
use crate::translate::{self, ClientDecisions, DecisionInput};
use crate::validator::{self, LegalBasisPolicy};
use crate::wire::conformance::{ConformanceMode, Faithful};
use crate::wire;

/// Who we are as a consent-management platform; stamped into every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmpProfile {
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u16,
    /// Used when the request carries no usable language.
    pub consent_language: String,
    pub policy_version: u16,
    pub publisher_country_code: Option<String>,
    pub is_service_specific: bool,
}

impl Default for CmpProfile {
    fn default() -> Self {
        Self {
            cmp_id: 1,
            cmp_version: 1,
            consent_screen: 1,
            consent_language: "EN".to_string(),
            policy_version: 5,
            publisher_country_code: None,
            is_service_specific: true,
        }
    }
}

impl CmpProfile {
    /// Metadata for a decision taken at `at`. The registry version is left for
    /// the validator to stamp.
    pub fn stamp(&self, at: DateTime<Utc>, request_language: Option<&str>) -> DecisionMetadata {
        DecisionMetadata {
            created: Some(at),
            last_updated: Some(at),
            cmp_id: self.cmp_id,
            cmp_version: self.cmp_version,
            consent_screen: self.consent_screen,
            consent_language: request_language
                .and_then(language_code)
                .unwrap_or_else(|| self.consent_language.clone()),
            vendor_list_version: 0,
            policy_version: self.policy_version,
            is_service_specific: self.is_service_specific,
            publisher_country_code: self.publisher_country_code.clone(),
        }
    }
}

/// `"de-AT,de;q=0.9"` → `"DE"`.
fn language_code(raw: &str) -> Option<String> {
    let code: String = raw.trim().chars().take(2).collect();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| code.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub registry: Duration,
    pub store: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            registry: Duration::from_secs(2),
            store: Duration::from_secs(5),
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub record: ConsentRecord,
    pub wire_string: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerifyReason {
    NoValidConsent,
    NotAllGranted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    /// True only if every requested purpose and vendor is individually allowed.
    pub has_consent: bool,
    pub reason: Option<VerifyReason>,
    pub purposes: BTreeMap<Identifier, bool>,
    pub vendors: BTreeMap<Identifier, bool>,
}

pub struct ConsentManager {
    registry: Arc<dyn RegistryProvider>,
    store: Arc<dyn ConsentStore>,
    audit: Arc<dyn AuditSink>,
    policy: LegalBasisPolicy,
    profile: CmpProfile,
    conformance: Arc<dyn ConformanceMode>,
    timeouts: Timeouts,
    pending_audits: Mutex<JoinSet<()>>,
}

impl ConsentManager {
    pub fn new(
        registry: Arc<dyn RegistryProvider>,
        store: Arc<dyn ConsentStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            store,
            audit,
            policy: LegalBasisPolicy::default(),
            profile: CmpProfile::default(),
            conformance: Arc::new(Faithful),
            timeouts: Timeouts::default(),
            pending_audits: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_policy(mut self, policy: LegalBasisPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: CmpProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_conformance(mut self, mode: Arc<dyn ConformanceMode>) -> Self {
        if mode.name() != Faithful.name() {
            warn!(mode = mode.name(), "conformance mode enabled; wire strings will not reflect user decisions");
        }
        self.conformance = mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Client-format entry point used by request handlers.
    pub async fn submit_consent(
        &self,
        site: &str,
        user: &str,
        decisions: impl Into<DecisionInput>,
        request: RequestMetadata,
    ) -> Result<Submission> {
        self.create(SubjectKey::new(site, user), Some(decisions.into()), request)
            .await
    }

    /// Validate, encode, and persist a new `Valid` record, superseding the
    /// previous one in the same store transition. `None` input records the
    /// minimal decision set.
    #[instrument(skip(self, input, request), fields(site = %subject.site_id, user = %subject.user_id))]
    pub async fn create(
        &self,
        subject: SubjectKey,
        input: Option<DecisionInput>,
        request: RequestMetadata,
    ) -> Result<Submission> {
        let registry = self.registry_snapshot().await?;
        let now = Utc::now();

        // 1. Normalize and stamp
        let mut decision = translate::normalize(input);
        decision.metadata = self.profile.stamp(now, request.language.as_deref());

        // 2. Validate; nothing is written when this fails
        let validated = validator::validate(decision, &registry, &self.policy).map_err(|errors| {
            debug!(errors = errors.len(), "decision rejected");
            ConsentError::ValidationFailed(errors)
        })?;

        // 3. Encode, honouring an explicitly configured conformance strategy
        let substituted = self.conformance.substitute(&validated, &registry);
        let conformance_mode = substituted.as_ref().map(|_| {
            warn!(mode = self.conformance.name(), "wire string substituted by conformance mode");
            self.conformance.name().to_string()
        });
        let wire_string = wire::assemble(substituted.as_ref().unwrap_or(&validated))?;

        // 4. Persist atomically
        let record = ConsentRecord {
            id: Uuid::now_v7(),
            site_id: subject.site_id.clone(),
            user_id: subject.user_id.clone(),
            decision: validated.into_inner(),
            status: ConsentStatus::Valid,
            validity: Validity {
                start_time: now,
                end_time: None,
            },
            wire_string: wire_string.clone(),
            request,
            conformance_mode,
        };
        let superseded = self
            .bounded(
                "store write",
                self.timeouts.store,
                self.store.supersede_and_insert(record.clone()),
            )
            .await?;
        if superseded.len() > 1 {
            warn!(count = superseded.len(), "superseded more than one valid record");
        }
        info!(record_id = %record.id, superseded = superseded.len(), "consent recorded");

        self.emit_audit(AuditEvent {
            site_id: subject.site_id,
            user_id: subject.user_id,
            action: AuditAction::Created,
            old_record: superseded.into_iter().last(),
            new_record: Some(record.clone()),
            at: now,
        });

        Ok(Submission {
            record,
            wire_string,
        })
    }

    #[instrument(skip(self))]
    pub async fn revoke_consent(&self, site: &str, user: &str) -> Result<ConsentRecord> {
        let subject = SubjectKey::new(site, user);
        let now = Utc::now();
        let revocation = self
            .bounded(
                "store write",
                self.timeouts.store,
                self.store.revoke_current(&subject, now),
            )
            .await?
            .ok_or_else(|| not_found(&subject))?;

        info!(record_id = %revocation.after.id, "consent revoked");
        self.emit_audit(AuditEvent {
            site_id: subject.site_id,
            user_id: subject.user_id,
            action: AuditAction::Revoked,
            old_record: Some(revocation.before),
            new_record: Some(revocation.after.clone()),
            at: now,
        });
        Ok(revocation.after)
    }

    pub async fn get_current_consent(&self, site: &str, user: &str) -> Result<ConsentRecord> {
        let subject = SubjectKey::new(site, user);
        self.current(&subject)
            .await?
            .ok_or_else(|| not_found(&subject))
    }

    #[instrument(skip(self))]
    pub async fn verify_consent(
        &self,
        site: &str,
        user: &str,
        purpose_ids: &[Identifier],
        vendor_ids: &[Identifier],
    ) -> Result<VerifyOutcome> {
        let subject = SubjectKey::new(site, user);
        let record = self.current(&subject).await?;

        let lookup = |ids: &[Identifier], allowed: &dyn Fn(Identifier) -> bool| {
            ids.iter().map(|id| (*id, allowed(*id))).collect::<BTreeMap<_, _>>()
        };

        let Some(record) = record else {
            return Ok(VerifyOutcome {
                has_consent: false,
                reason: Some(VerifyReason::NoValidConsent),
                purposes: lookup(purpose_ids, &|_| false),
                vendors: lookup(vendor_ids, &|_| false),
            });
        };

        let decision = &record.decision;
        let purposes = lookup(purpose_ids, &|id| decision.purpose_consent(id));
        let vendors = lookup(vendor_ids, &|id| decision.vendor_consent(id));
        let has_consent = purposes.values().chain(vendors.values()).all(|v| *v);

        Ok(VerifyOutcome {
            has_consent,
            reason: (!has_consent).then_some(VerifyReason::NotAllGranted),
            purposes,
            vendors,
        })
    }

    pub async fn get_history(
        &self,
        site: &str,
        user: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ConsentRecord>> {
        let subject = SubjectKey::new(site, user);
        self.bounded(
            "store read",
            self.timeouts.store,
            self.store.history(&subject, start, end),
        )
        .await
    }

    pub async fn get_record(&self, id: Uuid) -> Result<Option<ConsentRecord>> {
        self.bounded("store read", self.timeouts.store, self.store.get_record(id))
            .await
    }

    /// Decode a wire string into client format. Only granted decisions come
    /// back; see [`crate::bitfield`] for why.
    pub fn decode_wire_string(wire_string: &str) -> Result<ClientDecisions> {
        Ok(wire::parse(wire_string)?.to_client())
    }

    async fn current(&self, subject: &SubjectKey) -> Result<Option<ConsentRecord>> {
        self.bounded("store read", self.timeouts.store, self.store.current(subject))
            .await
    }

    async fn registry_snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        match tokio::time::timeout(self.timeouts.registry, self.registry.latest()).await {
            Err(_) => Err(ConsentError::Timeout {
                operation: "registry lookup",
            }),
            Ok(result) => result.map_err(|e| ConsentError::Registry(format!("{e:#}"))),
        }
    }

    /// Run a store call under a deadline. A store write cut short here is
    /// dropped before its transaction commits, so nothing becomes visible.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        budget: Duration,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(budget, call).await {
            Err(_) => Err(ConsentError::Timeout { operation }),
            Ok(result) => result.map_err(|e| ConsentError::Store(format!("{e:#}"))),
        }
    }

    /// Wait for audit emissions still in flight. Short-lived processes call
    /// this before exiting; dropping the manager aborts unfinished emissions.
    pub async fn flush_audit(&self) {
        let mut pending = match self.pending_audits.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }

    /// Fire-and-forget: the consent write already succeeded.
    fn emit_audit(&self, event: AuditEvent) {
        let sink = Arc::clone(&self.audit);
        let action = event.action;
        let task = async move {
            if let Err(e) = sink.record(event).await {
                error!(error = %e, ?action, "audit emission failed");
            }
        }
        .in_current_span();

        match self.pending_audits.lock() {
            Ok(mut pending) => {
                while pending.try_join_next().is_some() {}
                pending.spawn(task);
            }
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }
}

fn not_found(subject: &SubjectKey) -> ConsentError {
    ConsentError::NotFound {
        site: subject.site_id.clone(),
        user: subject.user_id.clone(),
    }
}
