//! Property tests for the wire codec and the legal-basis rules.
//!
//! Only granted (`true`) decisions survive the bitfield encoding, so the
//! round-trip law is stated over all-true decision sets.

use integration_tests::{client, id, memory_manager, sample_registry, REGISTRY_VERSION};
use proptest::prelude::*;
use rc_core::bitfield;
use rc_core::error::BitfieldError;
use rc_core::validator::{validate, LegalBasisPolicy};
use rc_core::wire::{assemble, parse};
use rc_core::models::RequestMetadata;
use rc_core::{ConsentManager, DecisionMap, DecisionMetadata, DecisionModel, Identifier};

const PURPOSES: &[u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const LI_PURPOSES: &[u32] = &[2, 7, 8, 9, 10, 11];
const VENDORS: &[u32] = &[1, 2, 10, 755];
const LI_VENDORS: &[u32] = &[1, 10, 755];
const SPECIAL_FEATURES: &[u32] = &[1, 2];

fn granted(ids: &'static [u32]) -> impl Strategy<Value = DecisionMap> {
    proptest::sample::subsequence(ids.to_vec(), 0..=ids.len())
        .prop_map(|picked| picked.into_iter().map(|n| (id(n), true)).collect())
}

prop_compose! {
    fn granted_model()(
        purpose_consents in granted(PURPOSES),
        purpose_legitimate_interests in granted(LI_PURPOSES),
        vendor_consents in granted(VENDORS),
        vendor_legitimate_interests in granted(LI_VENDORS),
        special_feature_optins in granted(SPECIAL_FEATURES),
        publisher_consents in granted(PURPOSES),
        publisher_legitimate_interests in granted(LI_PURPOSES),
        cmp_id in 1u16..4096,
        service_specific in any::<bool>(),
    ) -> DecisionModel {
        DecisionModel {
            purpose_consents,
            purpose_legitimate_interests,
            vendor_consents,
            vendor_legitimate_interests,
            special_feature_optins,
            publisher_consents,
            publisher_legitimate_interests,
            metadata: DecisionMetadata {
                created: Some(chrono::Utc::now()),
                cmp_id,
                is_service_specific: service_specific,
                ..DecisionMetadata::default()
            },
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn granted_decisions_survive_the_wire(model in granted_model()) {
        let registry = sample_registry();
        let validated = validate(model, &registry, &LegalBasisPolicy::default()).unwrap();

        let wire = assemble(&validated).unwrap();
        let decoded = parse(&wire).unwrap();

        prop_assert_eq!(&decoded.to_decision_model(), validated.decision());
        prop_assert_eq!(decoded.core.vendor_list_version, REGISTRY_VERSION);
        prop_assert!(wire.split('.').count() <= 4);
    }

    #[test]
    fn purpose_one_legitimate_interest_is_never_granted(claim in proptest::option::of(any::<bool>())) {
        let mut model = DecisionModel::minimal();
        if let Some(claim) = claim {
            model.purpose_legitimate_interests.insert(Identifier::DEVICE_ACCESS, claim);
        }

        match validate(model, &sample_registry(), &LegalBasisPolicy::default()) {
            Ok(validated) => {
                prop_assert!(!validated.decision().purpose_legitimate_interest(Identifier::DEVICE_ACCESS));
                prop_assert!(!validated
                    .decision()
                    .purpose_legitimate_interests
                    .contains_key(&Identifier::DEVICE_ACCESS));
            }
            Err(errors) => prop_assert_eq!(claim, Some(true), "unexpected errors {:?}", errors),
        }
    }

    #[test]
    fn bitfield_sets_exactly_the_boundary_bit(n in 1i64..5_000) {
        let field = bitfield::encode_ids(&[n], n as usize).unwrap();
        prop_assert_eq!(field.len(), n as usize);
        prop_assert!(field.is_set(n as usize - 1));
        prop_assert_eq!(field.bits().iter().filter(|b| **b).count(), 1);
    }

    #[test]
    fn bitfield_rejects_non_positive_identifiers(n in i64::MIN..=0) {
        let err = bitfield::encode_ids(&[n], 16).unwrap_err();
        prop_assert!(matches!(
            err,
            BitfieldError::ZeroIdentifier | BitfieldError::NegativeIdentifier(_)
        ));
    }

    #[test]
    fn submitted_grants_come_back_from_the_wire_string(
        purposes in proptest::sample::subsequence(PURPOSES[1..].to_vec(), 0..=PURPOSES.len() - 1),
        vendors in proptest::sample::subsequence(VENDORS.to_vec(), 0..=VENDORS.len()),
    ) {
        let mut granted_purposes = vec![(1, true)];
        granted_purposes.extend(purposes.iter().map(|n| (*n, true)));
        let granted_vendors: Vec<(u32, bool)> = vendors.iter().map(|n| (*n, true)).collect();
        let expected = client(&granted_purposes, &granted_vendors);

        let wire = tokio_test::block_on(async {
            let (manager, _store) = memory_manager();
            let submission = manager
                .submit_consent("site", "u-1", expected.clone(), RequestMetadata::default())
                .await
                .unwrap();
            manager.flush_audit().await;
            submission.wire_string
        });

        prop_assert_eq!(ConsentManager::decode_wire_string(&wire).unwrap(), expected);
    }

    #[test]
    fn parse_never_panics_on_arbitrary_input(raw in "[A-Za-z0-9_.-]{0,96}") {
        let _ = parse(&raw);
    }
}

#[test]
fn explicit_denials_are_dropped_by_the_encoding() {
    let mut model = DecisionModel::minimal();
    model.purpose_consents.insert(id(2), false);
    model.vendor_consents.insert(id(755), false);
    model.vendor_consents.insert(id(10), true);

    let validated = validate(model, &sample_registry(), &LegalBasisPolicy::default()).unwrap();
    let decoded = parse(&assemble(&validated).unwrap()).unwrap().to_decision_model();

    assert_eq!(decoded.purpose_consents, integration_tests::map(&[(1, true)]));
    assert_eq!(decoded.vendor_consents, integration_tests::map(&[(10, true)]));
    assert_eq!(decoded, validated.decision().granted_only());
}
