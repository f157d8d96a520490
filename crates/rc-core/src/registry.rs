//! # Registry Reference
//!
//! Read-only snapshot of the known purposes, vendors, and special features.
//! Snapshots are handed around as `Arc<RegistrySnapshot>` and never mutated,
//! so concurrent validations share one without locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Identifier, Namespace};
use crate::traits::RegistryProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// The purpose may only be pursued with consent, never legitimate interest.
    #[serde(default)]
    pub consent_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorEntry {
    pub name: String,
    #[serde(default)]
    pub purpose_ids: Vec<Identifier>,
    #[serde(default)]
    pub legitimate_interest_purpose_ids: Vec<Identifier>,
    #[serde(default)]
    pub special_feature_ids: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub version: u32,
    #[serde(default)]
    pub purposes: BTreeMap<Identifier, PurposeEntry>,
    #[serde(default)]
    pub vendors: BTreeMap<Identifier, VendorEntry>,
    #[serde(default)]
    pub special_features: BTreeMap<Identifier, FeatureEntry>,
}

impl RegistrySnapshot {
    /// Whether `id` exists in the registry namespace backing `namespace`.
    /// Publisher decisions are keyed by purpose identifiers.
    pub fn contains(&self, namespace: Namespace, id: Identifier) -> bool {
        match namespace {
            Namespace::Purpose | Namespace::Publisher => self.purposes.contains_key(&id),
            Namespace::Vendor => self.vendors.contains_key(&id),
            Namespace::SpecialFeature => self.special_features.contains_key(&id),
        }
    }

    /// Display name used by the storage format.
    pub fn name_of(&self, namespace: Namespace, id: Identifier) -> Option<&str> {
        match namespace {
            Namespace::Purpose | Namespace::Publisher => {
                self.purposes.get(&id).map(|p| p.name.as_str())
            }
            Namespace::Vendor => self.vendors.get(&id).map(|v| v.name.as_str()),
            Namespace::SpecialFeature => self.special_features.get(&id).map(|f| f.name.as_str()),
        }
    }

    /// Purpose 1 is consent-only whatever the registry says.
    pub fn is_consent_only(&self, purpose: Identifier) -> bool {
        purpose == Identifier::DEVICE_ACCESS
            || self.purposes.get(&purpose).is_some_and(|p| p.consent_only)
    }

    pub fn max_vendor_id(&self) -> Option<Identifier> {
        self.vendors.keys().next_back().copied()
    }
}

/// A provider that always hands out the same snapshot.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    snapshot: Arc<RegistrySnapshot>,
}

impl StaticRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
        }
    }
}

#[async_trait]
impl RegistryProvider for StaticRegistry {
    async fn latest(&self) -> anyhow::Result<Arc<RegistrySnapshot>> {
        Ok(Arc::clone(&self.snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "version": 48,
        "purposes": {
            "1": {"name": "Store and/or access information on a device"},
            "2": {"name": "Use limited data to select advertising"},
            "3": {"name": "Create profiles for personalised advertising", "consentOnly": true}
        },
        "vendors": {
            "8": {"name": "Example Ads", "purposeIds": [1, 2], "legitimateInterestPurposeIds": [2]}
        },
        "specialFeatures": {
            "1": {"name": "Use precise geolocation data"}
        }
    }"#;

    #[test]
    fn parses_vendor_list_shape() {
        let registry: RegistrySnapshot = serde_json::from_str(SAMPLE).unwrap();
        let id = |n| Identifier::from_u32(n).unwrap();

        assert_eq!(registry.version, 48);
        assert!(registry.contains(Namespace::Purpose, id(2)));
        assert!(registry.contains(Namespace::Publisher, id(2)));
        assert!(!registry.contains(Namespace::Vendor, id(2)));
        assert_eq!(registry.name_of(Namespace::Vendor, id(8)), Some("Example Ads"));
        assert_eq!(registry.max_vendor_id(), Some(id(8)));

        assert!(registry.is_consent_only(id(1)));
        assert!(!registry.is_consent_only(id(2)));
        assert!(registry.is_consent_only(id(3)));
    }
}
