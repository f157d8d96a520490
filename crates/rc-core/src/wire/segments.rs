//! Structured records carried by each dot-separated wire segment.
//!
//! Field order in these structs is the serialization order; keep it stable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bitfield::BitField;

/// Wire protocol version written into every core segment.
pub const PROTOCOL_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentType {
    Core,
    VendorsAllowedByConsent,
    VendorsAllowedByLegitimateInterest,
    Publisher,
}

impl SegmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::VendorsAllowedByConsent => "vendorsAllowedByConsent",
            Self::VendorsAllowedByLegitimateInterest => "vendorsAllowedByLegitimateInterest",
            Self::Publisher => "publisher",
        }
    }
}

impl FromStr for SegmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Core,
            Self::VendorsAllowedByConsent,
            Self::VendorsAllowedByLegitimateInterest,
            Self::Publisher,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSegment {
    pub segment_type: SegmentType,
    pub version: u8,
    pub created: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u16,
    pub consent_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_country_code: Option<String>,
    pub vendor_list_version: u32,
    pub policy_version: u16,
    pub is_service_specific: bool,
    pub purpose_consents: BitField,
    pub purpose_legitimate_interests: BitField,
    pub special_feature_optins: BitField,
}

/// One of the two vendor bitfields. `max_vendor_id` equals the bit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSegment {
    pub segment_type: SegmentType,
    pub max_vendor_id: u32,
    pub bits: BitField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSegment {
    pub segment_type: SegmentType,
    pub consents: BitField,
    pub legitimate_interests: BitField,
}
