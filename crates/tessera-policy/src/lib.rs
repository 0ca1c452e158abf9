//! Attribute policies and the policy-gated encryption capability.
//!
//! Three layers: boolean policy expressions over attribute labels, the
//! parameter-group algebra behind distributed setup, and the cipher that
//! gates a payload behind a policy. The cipher here is a reference scheme
//! built from the workspace's symmetric primitives; a production deployment
//! substitutes a pairing-based implementation behind the same functions.

pub mod cipher;
pub mod error;
pub mod expr;
pub mod keys;
pub mod params;

pub use cipher::{
    decrypt_slice, encrypt_slice, CiphertextRecord, CiphertextSlice, RecordMetadata,
};
pub use error::{PolicyError, PolicyResult};
pub use expr::PolicyExpr;
pub use keys::{AttributePublicKey, AuthorityKeyShare, KeyFragment, PartialKey};
pub use params::{ParamElement, PublicParameters};
