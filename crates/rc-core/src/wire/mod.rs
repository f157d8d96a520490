//! # Wire-String Assembler/Parser
//!
//! A wire string is 1–4 dot-separated segments, each an independently
//! base64url-encoded (no padding) JSON record:
//!
//! ```text
//! core[.vendorsAllowedByConsent][.vendorsAllowedByLegitimateInterest][.publisher]
//! ```
//!
//! The core segment is always first and always present. Every segment names
//! its own `segmentType`, so optional segments that would be empty are simply
//! left out.
//!
//! Bitfields inside segments follow [`crate::bitfield`], including its
//! lossiness: an explicit `false` does not survive [`assemble`] → [`parse`].

pub mod conformance;
pub mod segments;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bitfield::{self, BitField};
use crate::error::{ConsentError, ParseError, ParseErrorKind, Result};
use crate::models::{DecisionMap, DecisionMetadata, DecisionModel};
use crate::translate::{self, ClientDecisions, WireDecisions};
use crate::validator::ValidatedDecisionModel;

pub use segments::{CoreSegment, PublisherSegment, SegmentType, VendorSegment, PROTOCOL_VERSION};

/// Minimum purpose bitfield width; wider when a higher purpose id is present.
pub const PURPOSE_BITS: usize = 24;
/// Minimum special-feature bitfield width.
pub const SPECIAL_FEATURE_BITS: usize = 12;

const MAX_SEGMENTS: usize = 4;

/// Every segment of a parsed wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSegments {
    pub core: CoreSegment,
    pub vendors_allowed_by_consent: Option<VendorSegment>,
    pub vendors_allowed_by_legitimate_interest: Option<VendorSegment>,
    pub publisher: Option<PublisherSegment>,
}

impl DecodedSegments {
    pub fn metadata(&self) -> DecisionMetadata {
        let core = &self.core;
        DecisionMetadata {
            created: core.created,
            last_updated: core.last_updated,
            cmp_id: core.cmp_id,
            cmp_version: core.cmp_version,
            consent_screen: core.consent_screen,
            consent_language: core.consent_language.clone(),
            vendor_list_version: core.vendor_list_version,
            policy_version: core.policy_version,
            is_service_specific: core.is_service_specific,
            publisher_country_code: core.publisher_country_code.clone(),
        }
    }

    /// The granted decisions as the wire-format shape.
    pub fn to_wire_decisions(&self) -> WireDecisions {
        let vendor_bits = |segment: &Option<VendorSegment>| {
            segment
                .as_ref()
                .map(|s| bitfield::decode(&s.bits))
                .unwrap_or_default()
        };
        let publisher = self.publisher.as_ref();
        WireDecisions {
            purpose: translate::ConsentPair {
                consents: bitfield::decode(&self.core.purpose_consents),
                legitimate_interests: bitfield::decode(&self.core.purpose_legitimate_interests),
            },
            vendor: translate::ConsentPair {
                consents: vendor_bits(&self.vendors_allowed_by_consent),
                legitimate_interests: vendor_bits(&self.vendors_allowed_by_legitimate_interest),
            },
            special_feature_optins: bitfield::decode(&self.core.special_feature_optins),
            publisher: translate::ConsentPair {
                consents: publisher.map(|p| bitfield::decode(&p.consents)).unwrap_or_default(),
                legitimate_interests: publisher
                    .map(|p| bitfield::decode(&p.legitimate_interests))
                    .unwrap_or_default(),
            },
        }
    }

    pub fn to_decision_model(&self) -> DecisionModel {
        DecisionModel {
            metadata: self.metadata(),
            ..translate::from_wire(&self.to_wire_decisions())
        }
    }

    pub fn to_client(&self) -> ClientDecisions {
        translate::to_client(Some(&self.to_decision_model()))
    }
}

/// Compose the wire string for a validated model.
pub fn assemble(model: &ValidatedDecisionModel) -> Result<String> {
    let decision = model.decision();
    let wire = translate::to_wire(Some(decision));
    let meta = &decision.metadata;

    let purpose_len = PURPOSE_BITS.max(bitfield::max_identifier([
        &wire.purpose.consents,
        &wire.purpose.legitimate_interests,
    ]));
    let feature_len =
        SPECIAL_FEATURE_BITS.max(bitfield::max_identifier([&wire.special_feature_optins]));

    let core = CoreSegment {
        segment_type: SegmentType::Core,
        version: PROTOCOL_VERSION,
        created: meta.created,
        last_updated: meta.last_updated,
        cmp_id: meta.cmp_id,
        cmp_version: meta.cmp_version,
        consent_screen: meta.consent_screen,
        consent_language: meta.consent_language.clone(),
        publisher_country_code: meta.publisher_country_code.clone(),
        vendor_list_version: meta.vendor_list_version,
        policy_version: meta.policy_version,
        is_service_specific: meta.is_service_specific,
        purpose_consents: encode(&wire.purpose.consents, purpose_len)?,
        purpose_legitimate_interests: encode(&wire.purpose.legitimate_interests, purpose_len)?,
        special_feature_optins: encode(&wire.special_feature_optins, feature_len)?,
    };

    let mut segments = vec![encode_segment(&core)?];

    // Both vendor segments share the highest vendor id in the decision set.
    let max_vendor =
        bitfield::max_identifier([&wire.vendor.consents, &wire.vendor.legitimate_interests]);
    for (segment_type, map) in [
        (SegmentType::VendorsAllowedByConsent, &wire.vendor.consents),
        (
            SegmentType::VendorsAllowedByLegitimateInterest,
            &wire.vendor.legitimate_interests,
        ),
    ] {
        if map.is_empty() {
            continue;
        }
        let segment = VendorSegment {
            segment_type,
            max_vendor_id: u32::try_from(max_vendor)
                .map_err(|_| ConsentError::Internal("vendor id overflow".into()))?,
            bits: encode(map, max_vendor)?,
        };
        segments.push(encode_segment(&segment)?);
    }

    if !wire.publisher.consents.is_empty() || !wire.publisher.legitimate_interests.is_empty() {
        let publisher_len = PURPOSE_BITS.max(bitfield::max_identifier([
            &wire.publisher.consents,
            &wire.publisher.legitimate_interests,
        ]));
        let segment = PublisherSegment {
            segment_type: SegmentType::Publisher,
            consents: encode(&wire.publisher.consents, publisher_len)?,
            legitimate_interests: encode(&wire.publisher.legitimate_interests, publisher_len)?,
        };
        segments.push(encode_segment(&segment)?);
    }

    Ok(segments.join("."))
}

fn encode(map: &DecisionMap, length: usize) -> Result<BitField> {
    // Lengths are derived from the maps themselves, so this only fails on a bug.
    bitfield::encode(map, length).map_err(|e| ConsentError::Internal(e.to_string()))
}

fn encode_segment<T: Serialize>(segment: &T) -> Result<String> {
    let json = serde_json::to_vec(segment).map_err(|e| ConsentError::Internal(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decompose a wire string. Any bad segment fails the whole parse.
pub fn parse(wire: &str) -> std::result::Result<DecodedSegments, ParseError> {
    if wire.trim().is_empty() {
        return Err(ParseError::new(0, ParseErrorKind::Empty));
    }
    let parts: Vec<&str> = wire.trim().split('.').collect();
    if parts.len() > MAX_SEGMENTS {
        return Err(ParseError::new(MAX_SEGMENTS, ParseErrorKind::TooManySegments));
    }

    let mut core = None;
    let mut by_consent = None;
    let mut by_legitimate_interest = None;
    let mut publisher = None;

    for (index, part) in parts.into_iter().enumerate() {
        let fail = |kind| ParseError::new(index, kind);
        let (segment_type, value) = decode_segment(part).map_err(fail)?;

        if index == 0 && segment_type != SegmentType::Core {
            return Err(fail(ParseErrorKind::MissingCore));
        }
        let duplicate = || fail(ParseErrorKind::DuplicateSegment(segment_type.to_string()));

        match segment_type {
            SegmentType::Core => {
                if core.is_some() {
                    return Err(duplicate());
                }
                core = Some(structure::<CoreSegment>(value).map_err(fail)?);
            }
            SegmentType::VendorsAllowedByConsent | SegmentType::VendorsAllowedByLegitimateInterest => {
                let slot = if segment_type == SegmentType::VendorsAllowedByConsent {
                    &mut by_consent
                } else {
                    &mut by_legitimate_interest
                };
                if slot.is_some() {
                    return Err(duplicate());
                }
                let segment = structure::<VendorSegment>(value).map_err(fail)?;
                if segment.bits.len() != segment.max_vendor_id as usize {
                    return Err(fail(ParseErrorKind::LengthMismatch {
                        declared: segment.max_vendor_id as usize,
                        actual: segment.bits.len(),
                    }));
                }
                *slot = Some(segment);
            }
            SegmentType::Publisher => {
                if publisher.is_some() {
                    return Err(duplicate());
                }
                publisher = Some(structure::<PublisherSegment>(value).map_err(fail)?);
            }
        }
    }

    let core = core.ok_or_else(|| ParseError::new(0, ParseErrorKind::MissingCore))?;
    Ok(DecodedSegments {
        core,
        vendors_allowed_by_consent: by_consent,
        vendors_allowed_by_legitimate_interest: by_legitimate_interest,
        publisher,
    })
}

fn decode_segment(part: &str) -> std::result::Result<(SegmentType, Value), ParseErrorKind> {
    if part.is_empty() {
        return Err(ParseErrorKind::Empty);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| ParseErrorKind::Base64(e.to_string()))?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| ParseErrorKind::Structure(e.to_string()))?;
    let tag = value
        .get("segmentType")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseErrorKind::Structure("missing segmentType".into()))?;
    let segment_type = tag.parse::<SegmentType>().map_err(ParseErrorKind::UnknownSegmentType)?;
    Ok((segment_type, value))
}

fn structure<T: DeserializeOwned>(value: Value) -> std::result::Result<T, ParseErrorKind> {
    serde_json::from_value(value).map_err(|e| ParseErrorKind::Structure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identifier;
    use serde_json::json;

    fn id(raw: u32) -> Identifier {
        Identifier::from_u32(raw).unwrap()
    }

    fn sample() -> ValidatedDecisionModel {
        let mut model = DecisionModel::minimal();
        model.purpose_consents.insert(id(3), true);
        model.purpose_legitimate_interests.insert(id(7), true);
        model.vendor_consents.insert(id(755), true);
        model.vendor_consents.insert(id(12), true);
        model.vendor_legitimate_interests.insert(id(12), true);
        model.special_feature_optins.insert(id(1), true);
        model.publisher_consents.insert(id(2), true);
        model.metadata = DecisionMetadata {
            created: Some("2026-03-01T10:00:00.123Z".parse().unwrap()),
            last_updated: Some("2026-03-01T10:00:00.123Z".parse().unwrap()),
            cmp_id: 300,
            cmp_version: 4,
            consent_screen: 1,
            consent_language: "DE".into(),
            vendor_list_version: 48,
            policy_version: 5,
            is_service_specific: true,
            publisher_country_code: Some("AT".into()),
        };
        ValidatedDecisionModel::trusted(model, 48)
    }

    fn raw_segment(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn assemble_then_parse_round_trips() {
        let model = sample();
        let wire = assemble(&model).unwrap();
        assert_eq!(wire.split('.').count(), 4);
        assert!(!wire.contains('='));

        let decoded = parse(&wire).unwrap();
        assert_eq!(&decoded.to_decision_model(), model.decision());
    }

    #[test]
    fn empty_optional_segments_are_omitted() {
        let model = ValidatedDecisionModel::trusted(DecisionModel::minimal(), 1);
        let wire = assemble(&model).unwrap();
        assert_eq!(wire.split('.').count(), 1);

        let decoded = parse(&wire).unwrap();
        assert!(decoded.vendors_allowed_by_consent.is_none());
        assert_eq!(decoded.core.purpose_consents.len(), PURPOSE_BITS);
        assert_eq!(decoded.core.special_feature_optins.len(), SPECIAL_FEATURE_BITS);
    }

    #[test]
    fn vendor_segment_length_tracks_highest_vendor() {
        let decoded = parse(&assemble(&sample()).unwrap()).unwrap();
        let consent = decoded.vendors_allowed_by_consent.unwrap();
        let legitimate = decoded.vendors_allowed_by_legitimate_interest.unwrap();
        assert_eq!(consent.max_vendor_id, 755);
        assert_eq!(consent.bits.len(), 755);
        assert_eq!(legitimate.bits.len(), 755);
        assert!(legitimate.bits.is_set(11));
    }

    #[test]
    fn explicit_false_does_not_survive() {
        let mut model = DecisionModel::minimal();
        model.purpose_consents.insert(id(2), false);
        model.vendor_consents.insert(id(4), false);
        let validated = ValidatedDecisionModel::trusted(model.clone(), 1);

        let decoded = parse(&assemble(&validated).unwrap()).unwrap().to_decision_model();
        assert_ne!(decoded, model);
        assert_eq!(decoded.purpose_consents, model.granted_only().purpose_consents);
        assert!(decoded.vendor_consents.is_empty());
    }

    #[test]
    fn rejects_empty_string() {
        assert_eq!(parse("").unwrap_err(), ParseError::new(0, ParseErrorKind::Empty));
        assert_eq!(parse("   ").unwrap_err().kind, ParseErrorKind::Empty);
    }

    #[test]
    fn rejects_empty_segment_between_dots() {
        let wire = assemble(&sample()).unwrap();
        let segments: Vec<&str> = wire.split('.').collect();
        let broken = format!("{}..{}", segments[0], segments[1]);
        assert_eq!(parse(&broken).unwrap_err(), ParseError::new(1, ParseErrorKind::Empty));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = parse("not*base64").unwrap_err();
        assert_eq!(err.segment, 0);
        assert!(matches!(err.kind, ParseErrorKind::Base64(_)));
    }

    #[test]
    fn rejects_structurally_broken_segments() {
        let err = parse(&URL_SAFE_NO_PAD.encode(b"{not json")).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Structure(_)));

        let err = parse(&raw_segment(json!({"segmentType": "core", "version": 2}))).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Structure(_)));

        let core = assemble(&sample()).unwrap();
        let core = core.split('.').next().unwrap();
        let bad_bit = raw_segment(json!({
            "segmentType": "vendorsAllowedByConsent", "maxVendorId": 2, "bits": [1, 3]
        }));
        let err = parse(&format!("{core}.{bad_bit}")).unwrap_err();
        assert_eq!(err.segment, 1);
        assert!(matches!(err.kind, ParseErrorKind::Structure(_)));
    }

    #[test]
    fn rejects_segment_ordering_violations() {
        let wire = assemble(&sample()).unwrap();
        let parts: Vec<&str> = wire.split('.').collect();

        let err = parse(&format!("{}.{}", parts[1], parts[0])).unwrap_err();
        assert_eq!(err, ParseError::new(0, ParseErrorKind::MissingCore));

        let err = parse(&format!("{}.{}.{}", parts[0], parts[1], parts[1])).unwrap_err();
        assert_eq!(
            err,
            ParseError::new(
                2,
                ParseErrorKind::DuplicateSegment("vendorsAllowedByConsent".into())
            )
        );

        let err = parse(&format!("{wire}.{}", parts[3])).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TooManySegments);

        let unknown = raw_segment(json!({"segmentType": "disclosedVendors"}));
        let err = parse(&format!("{}.{unknown}", parts[0])).unwrap_err();
        assert_eq!(
            err,
            ParseError::new(1, ParseErrorKind::UnknownSegmentType("disclosedVendors".into()))
        );
    }

    #[test]
    fn rejects_vendor_length_mismatch() {
        let core = assemble(&sample()).unwrap();
        let core = core.split('.').next().unwrap();
        let vendors = raw_segment(json!({
            "segmentType": "vendorsAllowedByConsent", "maxVendorId": 5, "bits": [1, 0]
        }));
        let err = parse(&format!("{core}.{vendors}")).unwrap_err();
        assert_eq!(
            err,
            ParseError::new(1, ParseErrorKind::LengthMismatch { declared: 5, actual: 2 })
        );
    }

    #[test]
    fn decodes_to_client_format() {
        let client = parse(&assemble(&sample()).unwrap()).unwrap().to_client();
        assert_eq!(client.purposes.keys().map(|k| k.get()).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(client.vendors.keys().map(|k| k.get()).collect::<Vec<_>>(), vec![12, 755]);
        assert_eq!(client.special_features.len(), 1);
    }
}
