//! Ledger and content-store adapters.
//!
//! Thin typed layer over the two external services the protocol coordinates
//! through: the append-only ledger and the content-addressed store. The
//! in-memory backends double as test fixtures; the SQLite backends are the
//! durable local journals a deployment points at its gateway.

pub mod memory;
pub mod retry;
pub mod sqlite;
pub mod store;

pub use memory::{InMemoryContentStore, InMemoryLedger};
pub use retry::RetryPolicy;
pub use sqlite::{SqliteContentStore, SqliteLedger};
pub use store::content_id_for;
