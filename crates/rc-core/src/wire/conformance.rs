//! # Conformance Mode
//!
//! Some certification harnesses expect a fixed, fully-granted consent string
//! rather than a real user's choices. That behaviour is a compliance risk, so
//! it is never switched on by sniffing the caller: the strategy is picked once
//! at construction time from explicit configuration, and every substitution
//! is logged and marked on the persisted record.
//!
//! Substitution only affects the wire string. The decision model stored on the
//! record is always what the user actually chose.

use std::fmt;

use crate::models::{DecisionMap, DecisionModel};
use crate::registry::RegistrySnapshot;
use crate::validator::ValidatedDecisionModel;

pub trait ConformanceMode: Send + Sync + fmt::Debug {
    /// Short name persisted on records whose wire string was substituted.
    fn name(&self) -> &'static str;

    /// Return a replacement model for the wire string, or `None` to encode
    /// the user's decisions unchanged.
    fn substitute(
        &self,
        model: &ValidatedDecisionModel,
        registry: &RegistrySnapshot,
    ) -> Option<ValidatedDecisionModel>;
}

/// The default: encode exactly what the user decided.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faithful;

impl ConformanceMode for Faithful {
    fn name(&self) -> &'static str {
        "faithful"
    }

    fn substitute(
        &self,
        _model: &ValidatedDecisionModel,
        _registry: &RegistrySnapshot,
    ) -> Option<ValidatedDecisionModel> {
        None
    }
}

/// Encodes every registry purpose, vendor, and special feature as granted.
///
/// Legitimate interest is still only claimed where the registry allows it, so
/// the substituted string never breaks the purpose-1 rule.
#[derive(Debug, Clone, Copy)]
pub struct GrantAll {
    _configured: (),
}

impl GrantAll {
    /// Only reachable from configuration code that has an explicit opt-in flag.
    pub fn from_explicit_opt_in() -> Self {
        Self { _configured: () }
    }
}

impl ConformanceMode for GrantAll {
    fn name(&self) -> &'static str {
        "grant_all"
    }

    fn substitute(
        &self,
        model: &ValidatedDecisionModel,
        registry: &RegistrySnapshot,
    ) -> Option<ValidatedDecisionModel> {
        let all = |ids: Vec<_>| -> DecisionMap { ids.into_iter().map(|id| (id, true)).collect() };

        let decision = DecisionModel {
            purpose_consents: all(registry.purposes.keys().copied().collect()),
            purpose_legitimate_interests: all(registry
                .purposes
                .keys()
                .copied()
                .filter(|id| !registry.is_consent_only(*id))
                .collect()),
            vendor_consents: all(registry.vendors.keys().copied().collect()),
            vendor_legitimate_interests: all(registry
                .vendors
                .iter()
                .filter(|(_, v)| !v.legitimate_interest_purpose_ids.is_empty())
                .map(|(id, _)| *id)
                .collect()),
            special_feature_optins: all(registry.special_features.keys().copied().collect()),
            publisher_consents: model.decision().publisher_consents.clone(),
            publisher_legitimate_interests: model.decision().publisher_legitimate_interests.clone(),
            metadata: model.decision().metadata.clone(),
        };
        Some(ValidatedDecisionModel::trusted(decision, registry.version))
    }
}
