//! Authority-side protocol components.
//!
//! An authority participates in distributed parameter agreement
//! (commit-reveal over the ledger), holds a per-process key share, and runs
//! the key-issuance server that hands fragments to readers who prove —
//! by signature or in zero knowledge — that they are entitled to them.

pub mod coordinator;
pub mod error;
pub mod keystore;
pub mod nonces;
pub mod protocol;
pub mod server;

pub use coordinator::{AuthorityCoordinator, CoordinatorConfig, SetupPhase};
pub use error::{AuthorityError, AuthorityResult, IssuanceError, ProtocolError};
pub use keystore::{provision_key_share, AuthorityStore};
pub use nonces::NonceRegistry;
pub use protocol::{read_frame, write_frame, Request, Response, DISCONNECT_MESSAGE};
pub use server::{ConnectionState, KeyIssuanceServer};
