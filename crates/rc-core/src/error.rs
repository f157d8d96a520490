//! # ConsentError
//!
//! Centralized error handling for the Rusty-Consent ecosystem.
//! Every expected failure has a typed variant; untyped failures only come
//! from the plugin boundary (store, registry) and are wrapped as strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Identifier, Namespace};

/// The primary error type for all rc-core operations.
#[derive(Error, Debug)]
pub enum ConsentError {
    /// One or more identifiers or legal-basis claims were rejected.
    /// The list is complete: validation never stops at the first problem.
    #[error("validation failed with {} error(s): {}", .0.len(), join_errors(.0))]
    ValidationFailed(Vec<ValidationError>),

    /// Malformed wire string
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The operation needs a currently valid record for (site, user)
    #[error("no valid consent record for site {site} and user {user}")]
    NotFound { site: String, user: String },

    /// Input shape matches none of the three known decision formats
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// A registry or store call exceeded its configured budget
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// Persistence provider failure (e.g., DB locked, disk full)
    #[error("store error: {0}")]
    Store(String),

    /// Registry provider failure (e.g., vendor list unreadable)
    #[error("registry error: {0}")]
    Registry(String),

    /// Anything that indicates a bug rather than bad input
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for Rusty-Consent logic.
pub type Result<T> = std::result::Result<T, ConsentError>;

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single problem found by the decision validator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationError {
    #[error("unknown {namespace} identifier {id}")]
    UnknownIdentifier { namespace: Namespace, id: Identifier },

    #[error("{namespace} {id} may not be claimed under legitimate interest: {reason}")]
    InvalidLegalBasis {
        namespace: Namespace,
        id: Identifier,
        reason: LegalBasisViolation,
    },
}

impl ValidationError {
    pub fn id(&self) -> Identifier {
        match self {
            Self::UnknownIdentifier { id, .. } | Self::InvalidLegalBasis { id, .. } => *id,
        }
    }
}

/// Why a legitimate-interest claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LegalBasisViolation {
    /// Purpose 1 (store/access information on a device) is consent-only, always.
    PurposeOne,
    /// The registry or the deployment policy marks the purpose consent-only.
    ConsentOnlyPurpose,
    /// The vendor declares no purpose it pursues under legitimate interest.
    VendorDeclaresNone,
}

impl fmt::Display for LegalBasisViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PurposeOne => "purpose 1 is consent-only",
            Self::ConsentOnlyPurpose => "purpose is marked consent-only",
            Self::VendorDeclaresNone => "vendor declares no legitimate-interest purposes",
        };
        f.write_str(text)
    }
}

/// Wire-string decoding failure, pinned to the segment that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("wire string segment {segment}: {kind}")]
pub struct ParseError {
    /// Zero-based position of the offending dot-separated segment.
    pub segment: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(segment: usize, kind: ParseErrorKind) -> Self {
        Self { segment, kind }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("segment is empty")]
    Empty,
    #[error("invalid base64url: {0}")]
    Base64(String),
    #[error("invalid segment structure: {0}")]
    Structure(String),
    #[error("first segment must be the core segment")]
    MissingCore,
    #[error("unknown segment type {0:?}")]
    UnknownSegmentType(String),
    #[error("segment type {0:?} appears twice")]
    DuplicateSegment(String),
    #[error("more than 4 segments")]
    TooManySegments,
    #[error("bitfield declares {declared} bits but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Failure converting between client, storage, and wire decision shapes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("input matches none of the client, storage, or wire decision formats")]
    UnrecognizedShape,

    #[error("malformed {format} input: {message}")]
    Malformed { format: &'static str, message: String },

    /// Storage records carry a display name, so every identifier needs a registry entry.
    #[error("{namespace} {id} has no registry entry to name it")]
    UnregisteredIdentifier { namespace: Namespace, id: Identifier },
}

/// Bitfield encoding failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitfieldError {
    #[error("identifier 0 cannot be encoded; bit positions start at 1")]
    ZeroIdentifier,
    #[error("negative identifier {0} cannot be encoded")]
    NegativeIdentifier(i64),
    #[error("identifier {0} does not fit in a 32-bit namespace")]
    Overflow(i64),
    #[error("identifier {id} exceeds bitfield length {length}")]
    OutOfRange { id: Identifier, length: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failed_lists_every_error() {
        let err = ConsentError::ValidationFailed(vec![
            ValidationError::UnknownIdentifier {
                namespace: Namespace::Purpose,
                id: Identifier::from_u32(999).unwrap(),
            },
            ValidationError::InvalidLegalBasis {
                namespace: Namespace::Purpose,
                id: Identifier::from_u32(1).unwrap(),
                reason: LegalBasisViolation::PurposeOne,
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("unknown purpose identifier 999"));
        assert!(text.contains("purpose 1 is consent-only"));
    }

    #[test]
    fn parse_error_names_segment() {
        let err = ParseError::new(2, ParseErrorKind::Empty);
        assert_eq!(err.to_string(), "wire string segment 2: segment is empty");
    }
}
