//! # Format Translator
//!
//! Converts between the normalized [`DecisionModel`] and the three external
//! shapes a decision set travels in:
//!
//! - **client**: flat `purposes` / `vendors` / `specialFeatures` maps, what an
//!   interactive consent surface collects.
//! - **storage**: ordered `{id, name, allowed, legalBasis?}` records, readable
//!   in an audit without a registry at hand. Explicit `false` survives.
//! - **wire**: nested `purpose.consents` / `purpose.legitimateInterests` maps,
//!   what the wire-string assembler consumes.
//!
//! Every conversion builds its output from scratch; nothing is cloned and
//! patched in place. A missing decision set (`None`) converts to the minimal
//! instance of the target format: purpose 1 granted, nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TranslationError;
use crate::models::{DecisionMap, DecisionModel, Identifier, Namespace};
use crate::registry::RegistrySnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDecisions {
    #[serde(default)]
    pub purposes: DecisionMap,
    #[serde(default)]
    pub vendors: DecisionMap,
    #[serde(default)]
    pub special_features: DecisionMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    Consent,
    LegitimateInterest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub id: Identifier,
    pub name: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<LegalBasis>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDecisions {
    #[serde(default)]
    pub purposes: Vec<StorageEntry>,
    #[serde(default)]
    pub vendors: Vec<StorageEntry>,
    #[serde(default)]
    pub special_features: Vec<StorageEntry>,
    #[serde(default)]
    pub publisher: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPair {
    #[serde(default)]
    pub consents: DecisionMap,
    #[serde(default)]
    pub legitimate_interests: DecisionMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDecisions {
    #[serde(default)]
    pub purpose: ConsentPair,
    #[serde(default)]
    pub vendor: ConsentPair,
    #[serde(default)]
    pub special_feature_optins: DecisionMap,
    #[serde(default)]
    pub publisher: ConsentPair,
}

/// Decision input tagged with the format the caller says it is supplying.
///
/// JSON shape: `{"format": "client", "decisions": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "decisions", rename_all = "camelCase")]
pub enum DecisionInput {
    Client(ClientDecisions),
    Storage(StorageDecisions),
    Wire(WireDecisions),
}

impl From<ClientDecisions> for DecisionInput {
    fn from(value: ClientDecisions) -> Self {
        Self::Client(value)
    }
}

impl From<StorageDecisions> for DecisionInput {
    fn from(value: StorageDecisions) -> Self {
        Self::Storage(value)
    }
}

impl From<WireDecisions> for DecisionInput {
    fn from(value: WireDecisions) -> Self {
        Self::Wire(value)
    }
}

impl DecisionInput {
    /// Best-effort construction from an untagged JSON value. Prefer the tagged
    /// form; this exists for callers that only hold a bare payload.
    ///
    /// `null` is an absent decision set and yields `Ok(None)`.
    pub fn from_untagged(value: Value) -> Result<Option<Self>, TranslationError> {
        if value.is_null() {
            return Ok(None);
        }
        let input = match detect_format(&value) {
            DetectedFormat::Client => Self::Client(from_value("client", value)?),
            DetectedFormat::Storage => Self::Storage(from_value("storage", value)?),
            DetectedFormat::Wire => Self::Wire(from_value("wire", value)?),
            DetectedFormat::Unknown => return Err(TranslationError::UnrecognizedShape),
        };
        Ok(Some(input))
    }

    pub fn into_decision_model(self) -> DecisionModel {
        match self {
            Self::Client(c) => from_client(&c),
            Self::Storage(s) => from_storage(&s),
            Self::Wire(w) => from_wire(&w),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(
    format: &'static str,
    value: Value,
) -> Result<T, TranslationError> {
    serde_json::from_value(value).map_err(|e| TranslationError::Malformed {
        format,
        message: e.to_string(),
    })
}

/// Normalize an optional input; absence means the minimal decision set.
pub fn normalize(input: Option<DecisionInput>) -> DecisionModel {
    input.map_or_else(DecisionModel::minimal, DecisionInput::into_decision_model)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectedFormat {
    Client,
    Storage,
    Wire,
    Unknown,
}

/// Guess which of the three formats `value` is by its shape.
///
/// - storage: at least one of `purposes`/`vendors`/`specialFeatures`/`publisher`
///   is an array, and every array element is an object carrying `id` and `allowed`
/// - wire: a `purpose` object with a `consents` key
/// - client: a flat `purposes`, `vendors`, or `specialFeatures` object
pub fn detect_format(value: &Value) -> DetectedFormat {
    let Some(object) = value.as_object() else {
        return DetectedFormat::Unknown;
    };

    let sections = ["purposes", "vendors", "specialFeatures", "publisher"];
    let arrays: Vec<&Vec<Value>> = sections
        .iter()
        .filter_map(|k| object.get(*k).and_then(Value::as_array))
        .collect();
    if !arrays.is_empty() {
        let records = arrays.iter().flat_map(|a| a.iter()).all(|item| {
            item.as_object()
                .is_some_and(|o| o.contains_key("id") && o.contains_key("allowed"))
        });
        return if records {
            DetectedFormat::Storage
        } else {
            DetectedFormat::Unknown
        };
    }

    if object
        .get("purpose")
        .and_then(Value::as_object)
        .is_some_and(|p| p.contains_key("consents"))
    {
        return DetectedFormat::Wire;
    }

    if ["purposes", "vendors", "specialFeatures"]
        .iter()
        .any(|k| object.get(*k).is_some_and(Value::is_object))
    {
        return DetectedFormat::Client;
    }

    DetectedFormat::Unknown
}

// ── Client ──────────────────────────────────────────────────────────────────

pub fn from_client(client: &ClientDecisions) -> DecisionModel {
    DecisionModel {
        purpose_consents: client.purposes.clone(),
        vendor_consents: client.vendors.clone(),
        special_feature_optins: client.special_features.clone(),
        ..DecisionModel::default()
    }
}

/// Legitimate-interest and publisher decisions have no client representation
/// and are dropped.
pub fn to_client(model: Option<&DecisionModel>) -> ClientDecisions {
    match model {
        Some(m) => ClientDecisions {
            purposes: m.purpose_consents.clone(),
            vendors: m.vendor_consents.clone(),
            special_features: m.special_feature_optins.clone(),
        },
        None => to_client(Some(&DecisionModel::minimal())),
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

pub fn from_storage(storage: &StorageDecisions) -> DecisionModel {
    let (purpose_consents, purpose_legitimate_interests) = split_by_basis(&storage.purposes);
    let (vendor_consents, vendor_legitimate_interests) = split_by_basis(&storage.vendors);
    let (publisher_consents, publisher_legitimate_interests) = split_by_basis(&storage.publisher);
    DecisionModel {
        purpose_consents,
        purpose_legitimate_interests,
        vendor_consents,
        vendor_legitimate_interests,
        special_feature_optins: storage
            .special_features
            .iter()
            .map(|e| (e.id, e.allowed))
            .collect(),
        publisher_consents,
        publisher_legitimate_interests,
        metadata: Default::default(),
    }
}

fn split_by_basis(entries: &[StorageEntry]) -> (DecisionMap, DecisionMap) {
    let consents = entries
        .iter()
        .filter(|e| e.legal_basis != Some(LegalBasis::LegitimateInterest))
        .map(|e| (e.id, e.allowed))
        .collect();
    let legitimate_interests = entries
        .iter()
        .filter(|e| e.legal_basis == Some(LegalBasis::LegitimateInterest))
        .map(|e| (e.id, e.allowed))
        .collect();
    (consents, legitimate_interests)
}

/// Needs the registry to attach display names; an identifier the registry
/// cannot name is a [`TranslationError::UnregisteredIdentifier`].
pub fn to_storage(
    model: Option<&DecisionModel>,
    registry: &RegistrySnapshot,
) -> Result<StorageDecisions, TranslationError> {
    let Some(m) = model else {
        return to_storage(Some(&DecisionModel::minimal()), registry);
    };
    Ok(StorageDecisions {
        purposes: entries_with_basis(
            Namespace::Purpose,
            &m.purpose_consents,
            &m.purpose_legitimate_interests,
            registry,
        )?,
        vendors: entries_with_basis(
            Namespace::Vendor,
            &m.vendor_consents,
            &m.vendor_legitimate_interests,
            registry,
        )?,
        special_features: entries(Namespace::SpecialFeature, &m.special_feature_optins, None, registry)?,
        publisher: entries_with_basis(
            Namespace::Publisher,
            &m.publisher_consents,
            &m.publisher_legitimate_interests,
            registry,
        )?,
    })
}

fn entries_with_basis(
    namespace: Namespace,
    consents: &DecisionMap,
    legitimate_interests: &DecisionMap,
    registry: &RegistrySnapshot,
) -> Result<Vec<StorageEntry>, TranslationError> {
    let mut out = entries(namespace, consents, Some(LegalBasis::Consent), registry)?;
    out.extend(entries(
        namespace,
        legitimate_interests,
        Some(LegalBasis::LegitimateInterest),
        registry,
    )?);
    // Stable sort keeps consent ahead of legitimate interest for the same id.
    out.sort_by_key(|e| e.id);
    Ok(out)
}

fn entries(
    namespace: Namespace,
    map: &DecisionMap,
    legal_basis: Option<LegalBasis>,
    registry: &RegistrySnapshot,
) -> Result<Vec<StorageEntry>, TranslationError> {
    map.iter()
        .map(|(id, allowed)| {
            let name = registry
                .name_of(namespace, *id)
                .ok_or(TranslationError::UnregisteredIdentifier { namespace, id: *id })?;
            Ok(StorageEntry {
                id: *id,
                name: name.to_string(),
                allowed: *allowed,
                legal_basis,
            })
        })
        .collect()
}

// ── Wire ────────────────────────────────────────────────────────────────────

pub fn from_wire(wire: &WireDecisions) -> DecisionModel {
    DecisionModel {
        purpose_consents: wire.purpose.consents.clone(),
        purpose_legitimate_interests: wire.purpose.legitimate_interests.clone(),
        vendor_consents: wire.vendor.consents.clone(),
        vendor_legitimate_interests: wire.vendor.legitimate_interests.clone(),
        special_feature_optins: wire.special_feature_optins.clone(),
        publisher_consents: wire.publisher.consents.clone(),
        publisher_legitimate_interests: wire.publisher.legitimate_interests.clone(),
        metadata: Default::default(),
    }
}

pub fn to_wire(model: Option<&DecisionModel>) -> WireDecisions {
    match model {
        Some(m) => WireDecisions {
            purpose: ConsentPair {
                consents: m.purpose_consents.clone(),
                legitimate_interests: m.purpose_legitimate_interests.clone(),
            },
            vendor: ConsentPair {
                consents: m.vendor_consents.clone(),
                legitimate_interests: m.vendor_legitimate_interests.clone(),
            },
            special_feature_optins: m.special_feature_optins.clone(),
            publisher: ConsentPair {
                consents: m.publisher_consents.clone(),
                legitimate_interests: m.publisher_legitimate_interests.clone(),
            },
        },
        None => to_wire(Some(&DecisionModel::minimal())),
    }
}
