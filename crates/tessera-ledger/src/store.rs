//! Content addressing.

use sha2::{Digest, Sha256};
use tessera_core::ContentId;

/// Content id of a byte string: hex SHA-256.
pub fn content_id_for(bytes: &[u8]) -> ContentId {
    ContentId::new(hex::encode(Sha256::digest(bytes)))
}
