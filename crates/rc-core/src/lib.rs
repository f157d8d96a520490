//! rusty-consent/crates/rc-core/src/lib.rs
//!
//! Domain model, validation, wire encoding, and the consent lifecycle.
//! Persistence, registry loading, and auditing are ports implemented by plugins.

pub mod bitfield;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod registry;
pub mod traits;
pub mod translate;
pub mod validator;
pub mod wire;

// Re-exporting for easier access in other crates
pub use error::*;
pub use lifecycle::{CmpProfile, ConsentManager, Submission, Timeouts, VerifyOutcome, VerifyReason};
pub use models::*;
pub use registry::{RegistrySnapshot, StaticRegistry};
pub use traits::*;
pub use validator::{LegalBasisPolicy, ValidatedDecisionModel};
