//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Consent.
//! We use UUID v7 for time-ordered, globally unique record identification.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::BitfieldError;

/// A positive integer naming a purpose, vendor, or special feature.
///
/// Identifiers are only unique within their [`Namespace`]; purpose 3 and
/// vendor 3 are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u32")]
pub struct Identifier(NonZeroU32);

impl Identifier {
    /// Purpose 1: store and/or access information on a device.
    pub const DEVICE_ACCESS: Identifier = Identifier(NonZeroU32::MIN);

    /// Accepts any integer an external caller may hand us; zero and negative
    /// values are refused since bit positions start at 1.
    pub fn new(raw: i64) -> Result<Self, BitfieldError> {
        if raw == 0 {
            return Err(BitfieldError::ZeroIdentifier);
        }
        if raw < 0 {
            return Err(BitfieldError::NegativeIdentifier(raw));
        }
        let value = u32::try_from(raw).map_err(|_| BitfieldError::Overflow(raw))?;
        Self::try_from(value)
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Zero-based position of this identifier inside a bitfield.
    pub fn bit_index(self) -> usize {
        (self.get() - 1) as usize
    }
}

impl TryFrom<u32> for Identifier {
    type Error = BitfieldError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(BitfieldError::ZeroIdentifier)
    }
}

impl From<Identifier> for u32 {
    fn from(id: Identifier) -> Self {
        id.get()
    }
}

// Buffered content (adjacently tagged enums, `serde_json::Value`) replays
// object keys as strings, so numeric strings are accepted alongside integers.
impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentifierVisitor;

        impl Visitor<'_> for IdentifierVisitor {
            type Value = Identifier;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive integer identifier")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Identifier, E> {
                Identifier::new(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Identifier, E> {
                let raw = i64::try_from(v).map_err(|_| E::custom(BitfieldError::Overflow(i64::MAX)))?;
                Identifier::new(raw).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Identifier, E> {
                let raw: i64 = v
                    .trim()
                    .parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))?;
                Identifier::new(raw).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IdentifierVisitor)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four independent identifier namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    Purpose,
    Vendor,
    SpecialFeature,
    /// Publisher decisions, keyed by purpose identifiers.
    Publisher,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Purpose => "purpose",
            Self::Vendor => "vendor",
            Self::SpecialFeature => "special feature",
            Self::Publisher => "publisher purpose",
        };
        f.write_str(name)
    }
}

/// Identifier → explicit decision. An absent key means "no decision made".
pub type DecisionMap = BTreeMap<Identifier, bool>;

/// The canonical, normalized in-memory form of a consent decision set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionModel {
    #[serde(default)]
    pub purpose_consents: DecisionMap,
    /// Only meaningful for purposes that allow a legitimate-interest basis.
    /// Key 1 can never hold `true` past validation.
    #[serde(default)]
    pub purpose_legitimate_interests: DecisionMap,
    #[serde(default)]
    pub vendor_consents: DecisionMap,
    #[serde(default)]
    pub vendor_legitimate_interests: DecisionMap,
    #[serde(default)]
    pub special_feature_optins: DecisionMap,
    #[serde(default)]
    pub publisher_consents: DecisionMap,
    #[serde(default)]
    pub publisher_legitimate_interests: DecisionMap,
    #[serde(default)]
    pub metadata: DecisionMetadata,
}

impl DecisionModel {
    /// What an absent decision set translates to: purpose 1 granted, nothing else.
    pub fn minimal() -> Self {
        Self {
            purpose_consents: BTreeMap::from([(Identifier::DEVICE_ACCESS, true)]),
            ..Self::default()
        }
    }

    pub fn purpose_consent(&self, id: Identifier) -> bool {
        self.purpose_consents.get(&id).copied().unwrap_or(false)
    }

    pub fn purpose_legitimate_interest(&self, id: Identifier) -> bool {
        id != Identifier::DEVICE_ACCESS
            && self.purpose_legitimate_interests.get(&id).copied().unwrap_or(false)
    }

    pub fn vendor_consent(&self, id: Identifier) -> bool {
        self.vendor_consents.get(&id).copied().unwrap_or(false)
    }

    /// Same decisions with every explicit `false` dropped; the shape a
    /// bitfield round trip gives back.
    pub fn granted_only(&self) -> Self {
        fn keep_true(map: &DecisionMap) -> DecisionMap {
            map.iter().filter(|(_, v)| **v).map(|(k, v)| (*k, *v)).collect()
        }
        Self {
            purpose_consents: keep_true(&self.purpose_consents),
            purpose_legitimate_interests: keep_true(&self.purpose_legitimate_interests),
            vendor_consents: keep_true(&self.vendor_consents),
            vendor_legitimate_interests: keep_true(&self.vendor_legitimate_interests),
            special_feature_optins: keep_true(&self.special_feature_optins),
            publisher_consents: keep_true(&self.publisher_consents),
            publisher_legitimate_interests: keep_true(&self.publisher_legitimate_interests),
            metadata: self.metadata.clone(),
        }
    }
}

/// Who produced the decision set, when, and under which registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionMetadata {
    pub created: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub cmp_id: u16,
    pub cmp_version: u16,
    /// Which screen of the consent UI the user acted on.
    pub consent_screen: u16,
    /// Two-letter upper-case language code.
    pub consent_language: String,
    pub vendor_list_version: u32,
    pub policy_version: u16,
    pub is_service_specific: bool,
    pub publisher_country_code: Option<String>,
}

impl Default for DecisionMetadata {
    fn default() -> Self {
        Self {
            created: None,
            last_updated: None,
            cmp_id: 0,
            cmp_version: 0,
            consent_screen: 0,
            consent_language: "EN".to_string(),
            vendor_list_version: 0,
            policy_version: 0,
            is_service_specific: false,
            publisher_country_code: None,
        }
    }
}

/// The (site, user) pair a consent record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub site_id: String,
    pub user_id: String,
}

impl SubjectKey {
    pub fn new(site_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site_id, self.user_id)
    }
}

/// Lifecycle state of a single record instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Valid,
    /// Terminal: a newer record took over.
    Superseded,
    /// Terminal: the user withdrew consent.
    Revoked,
}

impl ConsentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Superseded => "superseded",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "valid" => Some(Self::Valid),
            "superseded" => Some(Self::Superseded),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Validity {
    /// True when this window shares at least one instant with `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time <= end && self.end_time.map_or(true, |e| e >= start)
    }
}

/// Free-form context captured with the request that produced a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub device_type: Option<String>,
    pub region: Option<String>,
}

/// The persisted lifecycle entity: one Decision Model snapshot plus its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: Uuid,
    pub site_id: String,
    pub user_id: String,
    pub decision: DecisionModel,
    pub status: ConsentStatus,
    pub validity: Validity,
    pub wire_string: String,
    pub request: RequestMetadata,
    /// Set when a conformance strategy replaced the wire payload.
    #[serde(default)]
    pub conformance_mode: Option<String>,
}

impl ConsentRecord {
    pub fn subject(&self) -> SubjectKey {
        SubjectKey::new(&self.site_id, &self.user_id)
    }

    pub fn is_valid(&self) -> bool {
        self.status == ConsentStatus::Valid
    }

    /// Close the validity window. Only persistence providers call this, and
    /// only while executing a transition requested by the lifecycle manager.
    pub fn close(&mut self, status: ConsentStatus, at: DateTime<Utc>) {
        self.status = status;
        self.validity.end_time = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Revoked,
}

/// Emitted after every successful create/revoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub site_id: String,
    pub user_id: String,
    pub action: AuditAction,
    pub old_record: Option<ConsentRecord>,
    pub new_record: Option<ConsentRecord>,
    pub at: DateTime<Utc>,
}
