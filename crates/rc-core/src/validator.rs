//! # Decision Validator
//!
//! Checks a [`DecisionModel`] against a [`RegistrySnapshot`] and a
//! [`LegalBasisPolicy`]. Validation is all-or-nothing: every problem is
//! collected and returned together, and no partially-validated model escapes.

use std::collections::BTreeSet;

use crate::error::{LegalBasisViolation, ValidationError};
use crate::models::{DecisionMap, DecisionModel, Identifier, Namespace};
use crate::registry::RegistrySnapshot;

/// Deployment rules layered on top of what the registry declares.
#[derive(Debug, Clone)]
pub struct LegalBasisPolicy {
    /// Purposes treated as consent-only in addition to the registry's own flags.
    pub consent_only_purposes: BTreeSet<Identifier>,
    /// Refuse vendor legitimate-interest claims from vendors that declare no
    /// legitimate-interest purpose.
    pub enforce_vendor_legitimate_interest: bool,
}

impl Default for LegalBasisPolicy {
    fn default() -> Self {
        Self {
            consent_only_purposes: BTreeSet::new(),
            enforce_vendor_legitimate_interest: true,
        }
    }
}

/// A decision model that passed validation against a specific registry version.
/// The version is also stamped into the model's metadata.
///
/// Only [`validate`] and the conformance strategies build one, so holding a
/// `ValidatedDecisionModel` is proof the identifiers and legal bases were checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDecisionModel {
    decision: DecisionModel,
    registry_version: u32,
}

impl ValidatedDecisionModel {
    pub(crate) fn trusted(decision: DecisionModel, registry_version: u32) -> Self {
        Self {
            decision,
            registry_version,
        }
    }

    pub fn decision(&self) -> &DecisionModel {
        &self.decision
    }

    pub fn registry_version(&self) -> u32 {
        self.registry_version
    }

    pub fn into_inner(self) -> DecisionModel {
        self.decision
    }
}

pub fn validate(
    decision: DecisionModel,
    registry: &RegistrySnapshot,
    policy: &LegalBasisPolicy,
) -> Result<ValidatedDecisionModel, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let namespaces: [(Namespace, &DecisionMap); 7] = [
        (Namespace::Purpose, &decision.purpose_consents),
        (Namespace::Purpose, &decision.purpose_legitimate_interests),
        (Namespace::Vendor, &decision.vendor_consents),
        (Namespace::Vendor, &decision.vendor_legitimate_interests),
        (Namespace::SpecialFeature, &decision.special_feature_optins),
        (Namespace::Publisher, &decision.publisher_consents),
        (Namespace::Publisher, &decision.publisher_legitimate_interests),
    ];

    // 1. Identifier existence, deduplicated so a key present in both the
    //    consent and legitimate-interest map is reported once.
    let mut reported = BTreeSet::new();
    for (namespace, map) in namespaces {
        for id in map.keys() {
            if !registry.contains(namespace, *id) && reported.insert((namespace_rank(namespace), *id)) {
                errors.push(ValidationError::UnknownIdentifier {
                    namespace,
                    id: *id,
                });
            }
        }
    }

    // 2. Legitimate-interest claims. Only `true` is a claim; an explicit
    //    `false` simply records the user's objection.
    for namespace in [Namespace::Purpose, Namespace::Publisher] {
        let map = match namespace {
            Namespace::Purpose => &decision.purpose_legitimate_interests,
            _ => &decision.publisher_legitimate_interests,
        };
        for id in claimed(map) {
            let reason = if id == Identifier::DEVICE_ACCESS {
                Some(LegalBasisViolation::PurposeOne)
            } else if registry.is_consent_only(id) || policy.consent_only_purposes.contains(&id) {
                Some(LegalBasisViolation::ConsentOnlyPurpose)
            } else {
                None
            };
            if let Some(reason) = reason {
                errors.push(ValidationError::InvalidLegalBasis {
                    namespace,
                    id,
                    reason,
                });
            }
        }
    }

    if policy.enforce_vendor_legitimate_interest {
        for id in claimed(&decision.vendor_legitimate_interests) {
            let declares_none = registry
                .vendors
                .get(&id)
                .is_some_and(|v| v.legitimate_interest_purpose_ids.is_empty());
            if declares_none {
                errors.push(ValidationError::InvalidLegalBasis {
                    namespace: Namespace::Vendor,
                    id,
                    reason: LegalBasisViolation::VendorDeclaresNone,
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut decision = decision;
    decision.metadata.vendor_list_version = registry.version;
    // Past step 2 any entry left for a consent-only purpose is an explicit
    // `false`; it carries no meaning and must not surface as a legal basis.
    let consent_only =
        |id: &Identifier| registry.is_consent_only(*id) || policy.consent_only_purposes.contains(id);
    decision
        .purpose_legitimate_interests
        .retain(|id, _| !consent_only(id));
    decision
        .publisher_legitimate_interests
        .retain(|id, _| !consent_only(id));

    Ok(ValidatedDecisionModel::trusted(decision, registry.version))
}

fn claimed(map: &DecisionMap) -> impl Iterator<Item = Identifier> + '_ {
    map.iter().filter(|(_, granted)| **granted).map(|(id, _)| *id)
}

fn namespace_rank(namespace: Namespace) -> u8 {
    match namespace {
        Namespace::Purpose => 0,
        Namespace::Vendor => 1,
        Namespace::SpecialFeature => 2,
        Namespace::Publisher => 3,
    }
}
