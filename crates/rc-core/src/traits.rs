//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AuditEvent, ConsentRecord, SubjectKey};
use crate::registry::RegistrySnapshot;

/// Source of the authoritative purpose/vendor/special-feature lists.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Returns the newest snapshot. Snapshots are immutable once handed out.
    async fn latest(&self) -> anyhow::Result<Arc<RegistrySnapshot>>;
}

/// A record that moved from `Valid` to `Revoked`, before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub before: ConsentRecord,
    pub after: ConsentRecord,
}

/// Data persistence contract for consent records.
///
/// # Developer Note
/// Implementations must guarantee that no reader ever observes two `Valid`
/// records for the same (site, user). `supersede_and_insert` is therefore a
/// single atomic transition, not two calls the manager strings together.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Marks every `Valid` record for the new record's (site, user) as
    /// `Superseded` with `end_time` set to the new record's start time, then
    /// inserts `record`. Returns the records that were superseded, post-change.
    async fn supersede_and_insert(&self, record: ConsentRecord) -> anyhow::Result<Vec<ConsentRecord>>;

    /// Moves the current `Valid` record to `Revoked`. `None` if there is none.
    async fn revoke_current(
        &self,
        subject: &SubjectKey,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Revocation>>;

    async fn current(&self, subject: &SubjectKey) -> anyhow::Result<Option<ConsentRecord>>;

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<ConsentRecord>>;

    /// Records whose validity window overlaps `[start, end]`, oldest first.
    async fn history(
        &self,
        subject: &SubjectKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ConsentRecord>>;
}

/// Audit trail contract. Called fire-and-forget; failures never reach the
/// caller of the consent operation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()>;
}
