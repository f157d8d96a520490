//! N concurrent submissions for one (site, user) must leave exactly one
//! `Valid` record and N-1 `Superseded` ones, whichever store backs them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use integration_tests::{client, manager_with};
use rc_audit_jsonl::TracingAudit;
use rc_core::models::{ConsentStatus, RequestMetadata};
use rc_core::traits::ConsentStore;
use rc_core::ConsentManager;
use rc_db_sqlite::SqliteConsentStore;
use rc_store_memory::MemoryConsentStore;

const N: usize = 10;

async fn submit_concurrently(manager: Arc<ConsentManager>, user: &'static str) -> Vec<uuid::Uuid> {
    let mut handles = Vec::new();
    for i in 0..N {
        let m = manager.clone();
        handles.push(tokio::spawn(async move {
            let decisions = client(&[(1, true), (2, i % 2 == 0)], &[(10, true)]);
            m.submit_consent("site", user, decisions, RequestMetadata::default())
                .await
                .map(|s| s.record.id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("task panicked").expect("submission failed"));
    }
    ids
}

async fn assert_single_valid(manager: &ConsentManager, user: &str, created: &[uuid::Uuid]) {
    let history = manager
        .get_history(
            "site",
            user,
            Utc::now() - Duration::hours(1),
            Utc::now() + Duration::hours(1),
        )
        .await
        .unwrap();

    assert_eq!(history.len(), N);
    let valid: Vec<_> = history.iter().filter(|r| r.status == ConsentStatus::Valid).collect();
    let superseded = history
        .iter()
        .filter(|r| r.status == ConsentStatus::Superseded)
        .count();
    assert_eq!(valid.len(), 1, "expected exactly one valid record");
    assert_eq!(superseded, N - 1);
    assert!(created.contains(&valid[0].id));

    let current = manager.get_current_consent("site", user).await.unwrap();
    assert_eq!(current.id, valid[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_keeps_one_valid_record() {
    let store: Arc<dyn ConsentStore> = Arc::new(MemoryConsentStore::new());
    let manager = Arc::new(manager_with(store, Arc::new(TracingAudit)));

    let created = submit_concurrently(manager.clone(), "racer").await;
    assert_single_valid(&manager, "racer", &created).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_store_keeps_one_valid_record() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("consent.db").display());
    let store: Arc<dyn ConsentStore> = Arc::new(SqliteConsentStore::new(&url, 4).await.unwrap());
    let manager = Arc::new(manager_with(store, Arc::new(TracingAudit)));

    let created = submit_concurrently(manager.clone(), "racer").await;
    assert_single_valid(&manager, "racer", &created).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_users_do_not_interfere() {
    let (manager, _store) = integration_tests::memory_manager();
    let manager = Arc::new(manager);

    let mut handles = Vec::new();
    for user in ["a", "b", "c", "d", "e"] {
        let m = manager.clone();
        handles.push(tokio::spawn(async move {
            m.submit_consent("site", user, client(&[(1, true)], &[]), RequestMetadata::default())
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().record.is_valid());
    }

    for user in ["a", "b", "c", "d", "e"] {
        assert!(manager.get_current_consent("site", user).await.is_ok());
    }
}
