//! Attribute certification.
//!
//! The certifier assigns each (reader, attribute) a fresh secret, publishes
//! only the commitment to the ledger plus a label bundle to the content
//! store, and keeps the secrets in its private store until they are handed
//! to the legitimate reader over a trusted channel.

pub mod bundle;
pub mod certifier;
pub mod error;
pub mod store;

pub use bundle::AttributeBundle;
pub use certifier::{Certifier, CertificationSummary, RoleAssignments};
pub use error::{CertifierError, CertifierResult};
pub use store::CertifierStore;
