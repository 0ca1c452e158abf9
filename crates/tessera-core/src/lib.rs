//! Tessera core types.
//!
//! Shared data model for the attribute-gated key-issuance protocol:
//! typed identifiers, attribute tuples and their commitments, the trait
//! seams to the ledger and content store, and the metrics collector.

pub mod commitment;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

pub use commitment::*;
pub use error::*;
pub use metrics::*;
pub use traits::*;
pub use types::*;
