//! Shared fixtures for the cross-crate test suites under `tests/`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rc_audit_jsonl::TracingAudit;
use rc_core::registry::{FeatureEntry, PurposeEntry, RegistrySnapshot, StaticRegistry, VendorEntry};
use rc_core::traits::{AuditSink, ConsentStore};
use rc_core::translate::ClientDecisions;
use rc_core::{ConsentManager, DecisionMap, Identifier};
use rc_store_memory::MemoryConsentStore;

pub const REGISTRY_VERSION: u32 = 48;

pub fn id(raw: u32) -> Identifier {
    Identifier::from_u32(raw).expect("fixture identifiers are non-zero")
}

pub fn map(pairs: &[(u32, bool)]) -> DecisionMap {
    pairs.iter().map(|(k, v)| (id(*k), *v)).collect()
}

/// Eleven purposes (3–6 consent-only), two special features, and a handful of
/// vendors with ids far enough apart to exercise bitfield widths.
pub fn sample_registry() -> RegistrySnapshot {
    let purposes = (1..=11)
        .map(|n| {
            (
                id(n),
                PurposeEntry {
                    name: format!("Purpose {n}"),
                    description: None,
                    consent_only: (3..=6).contains(&n),
                },
            )
        })
        .collect();

    let vendor = |name: &str, li: &[u32]| VendorEntry {
        name: name.to_string(),
        purpose_ids: vec![id(1), id(2)],
        legitimate_interest_purpose_ids: li.iter().map(|n| id(*n)).collect(),
        special_feature_ids: vec![],
    };
    let vendors = BTreeMap::from([
        (id(1), vendor("Vendor One", &[2, 7])),
        (id(2), vendor("Vendor Two", &[])),
        (id(10), vendor("Vendor Ten", &[7])),
        (id(755), vendor("Vendor 755", &[2])),
    ]);

    let special_features = BTreeMap::from([
        (
            id(1),
            FeatureEntry {
                name: "Precise geolocation".into(),
                description: None,
            },
        ),
        (
            id(2),
            FeatureEntry {
                name: "Device scanning".into(),
                description: None,
            },
        ),
    ]);

    RegistrySnapshot {
        version: REGISTRY_VERSION,
        purposes,
        vendors,
        special_features,
    }
}

pub fn client(purposes: &[(u32, bool)], vendors: &[(u32, bool)]) -> ClientDecisions {
    ClientDecisions {
        purposes: map(purposes),
        vendors: map(vendors),
        special_features: DecisionMap::new(),
    }
}

pub fn manager_with(store: Arc<dyn ConsentStore>, audit: Arc<dyn AuditSink>) -> ConsentManager {
    ConsentManager::new(Arc::new(StaticRegistry::new(sample_registry())), store, audit).with_timeouts(
        rc_core::Timeouts {
            registry: Duration::from_secs(2),
            store: Duration::from_secs(10),
        },
    )
}

/// Manager over a fresh in-memory store; the store handle is returned for inspection.
pub fn memory_manager() -> (ConsentManager, Arc<MemoryConsentStore>) {
    let store = Arc::new(MemoryConsentStore::new());
    (manager_with(store.clone(), Arc::new(TracingAudit)), store)
}
