//! # rc-store-memory
//! rusty-consent/crates/rc-plugins/rc-store-memory/src/lib.rs
//! Process-local `ConsentStore` backed by `DashMap`.
//!
//! Each (site, user) owns one vector of records. Every transition runs while
//! holding that subject's shard lock, so readers never see two `Valid`
//! records and concurrent writers for the same subject are serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rc_core::models::{ConsentRecord, ConsentStatus, SubjectKey};
use rc_core::traits::{ConsentStore, Revocation};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryConsentStore {
    records: DashMap<SubjectKey, Vec<ConsentRecord>>,
    /// Record id → owning subject, for `get_record`.
    index: DashMap<Uuid, SubjectKey>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for a subject, in every status.
    pub fn len_for(&self, subject: &SubjectKey) -> usize {
        self.records.get(subject).map_or(0, |r| r.len())
    }
}

#[async_trait]
impl ConsentStore for MemoryConsentStore {
    async fn supersede_and_insert(&self, record: ConsentRecord) -> anyhow::Result<Vec<ConsentRecord>> {
        let subject = record.subject();
        let id = record.id;
        let start = record.validity.start_time;

        let superseded = {
            let mut entry = self.records.entry(subject.clone()).or_default();
            let mut superseded = Vec::new();
            for existing in entry.iter_mut().filter(|r| r.is_valid()) {
                existing.close(ConsentStatus::Superseded, start);
                superseded.push(existing.clone());
            }
            entry.push(record);
            superseded
        };

        self.index.insert(id, subject);
        Ok(superseded)
    }

    async fn revoke_current(
        &self,
        subject: &SubjectKey,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Revocation>> {
        let Some(mut entry) = self.records.get_mut(subject) else {
            return Ok(None);
        };
        let Some(current) = entry.iter_mut().find(|r| r.is_valid()) else {
            return Ok(None);
        };

        let before = current.clone();
        current.close(ConsentStatus::Revoked, at);
        Ok(Some(Revocation {
            before,
            after: current.clone(),
        }))
    }

    async fn current(&self, subject: &SubjectKey) -> anyhow::Result<Option<ConsentRecord>> {
        Ok(self
            .records
            .get(subject)
            .and_then(|records| records.iter().find(|r| r.is_valid()).cloned()))
    }

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<ConsentRecord>> {
        let Some(subject) = self.index.get(&id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .records
            .get(&subject)
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn history(
        &self,
        subject: &SubjectKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ConsentRecord>> {
        let mut matching: Vec<ConsentRecord> = self
            .records
            .get(subject)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.validity.overlaps(start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by(|a, b| {
            a.validity
                .start_time
                .cmp(&b.validity.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rc_core::models::{DecisionModel, RequestMetadata, Validity};
    use std::sync::Arc;

    fn record(user: &str, start: DateTime<Utc>) -> ConsentRecord {
        ConsentRecord {
            id: Uuid::now_v7(),
            site_id: "site".into(),
            user_id: user.into(),
            decision: DecisionModel::minimal(),
            status: ConsentStatus::Valid,
            validity: Validity {
                start_time: start,
                end_time: None,
            },
            wire_string: String::new(),
            request: RequestMetadata::default(),
            conformance_mode: None,
        }
    }

    #[tokio::test]
    async fn supersede_closes_previous_window() {
        let store = MemoryConsentStore::new();
        let t0 = Utc::now();
        let first = record("user", t0);
        let second = record("user", t0 + Duration::seconds(3));

        store.supersede_and_insert(first.clone()).await.unwrap();
        let superseded = store.supersede_and_insert(second.clone()).await.unwrap();

        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].status, ConsentStatus::Superseded);
        assert_eq!(superseded[0].validity.end_time, Some(second.validity.start_time));

        let subject = SubjectKey::new("site", "user");
        assert_eq!(store.current(&subject).await.unwrap().map(|r| r.id), Some(second.id));
        assert_eq!(
            store.get_record(first.id).await.unwrap().map(|r| r.status),
            Some(ConsentStatus::Superseded)
        );
        assert_eq!(store.len_for(&subject), 2);
    }

    #[tokio::test]
    async fn revoke_without_record_is_none() {
        let store = MemoryConsentStore::new();
        let subject = SubjectKey::new("site", "nobody");
        assert_eq!(store.revoke_current(&subject, Utc::now()).await.unwrap(), None);

        store.supersede_and_insert(record("nobody", Utc::now())).await.unwrap();
        assert!(store.revoke_current(&subject, Utc::now()).await.unwrap().is_some());
        assert_eq!(store.revoke_current(&subject, Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn history_filters_by_overlap() {
        let store = MemoryConsentStore::new();
        let subject = SubjectKey::new("site", "user");
        let t0 = Utc::now();
        store.supersede_and_insert(record("user", t0)).await.unwrap();
        store
            .supersede_and_insert(record("user", t0 + Duration::minutes(10)))
            .await
            .unwrap();

        let before = store
            .history(&subject, t0 - Duration::hours(2), t0 - Duration::hours(1))
            .await
            .unwrap();
        assert!(before.is_empty());

        let late = store
            .history(&subject, t0 + Duration::hours(1), t0 + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(late.len(), 1);
        assert!(late[0].is_valid());
    }

    #[tokio::test]
    async fn concurrent_inserts_leave_one_valid_record() {
        const N: usize = 10;
        let store = Arc::new(MemoryConsentStore::new());

        let mut handles = Vec::new();
        for _ in 0..N {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.supersede_and_insert(record("user", Utc::now())).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = store
            .history(
                &SubjectKey::new("site", "user"),
                Utc::now() - Duration::hours(1),
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), N);
        assert_eq!(all.iter().filter(|r| r.is_valid()).count(), 1);
        assert_eq!(
            all.iter().filter(|r| r.status == ConsentStatus::Superseded).count(),
            N - 1
        );
    }
}
