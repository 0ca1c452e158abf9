//! Attribute tuples and their public commitments.
//!
//! A commitment binds all five tuple fields into a single 32-byte value
//! that can be published without revealing the tuple. The same tuple always
//! commits to the same value; publishing it leaks nothing about the secret.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CoreError, CoreResult};
use crate::types::{hex_bytes, AttrType, AttributeLabel, AuthorityId, ExpiryDate};

/// Domain separator for the commitment encoding. Changing it invalidates
/// every published commitment.
const COMMITMENT_DOMAIN: &[u8] = b"tessera.attribute.commitment.v1";

// ---------------------------------------------------------------------------
// AttributeSecret — 32 random bytes, zeroized on drop
// ---------------------------------------------------------------------------

/// The private half of a certified attribute. Held by the certifier and,
/// after out-of-band delivery, by the owning reader. Never published,
/// never sent to an authority.
#[derive(Clone, Serialize, Deserialize)]
pub struct AttributeSecret(#[serde(with = "hex_bytes")] [u8; 32]);

impl AttributeSecret {
    pub fn generate<R: rand::RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for AttributeSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for AttributeSecret {}

impl fmt::Debug for AttributeSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeSecret([REDACTED])")
    }
}

impl Drop for AttributeSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// ---------------------------------------------------------------------------
// AttributeTuple — what a reader must know to request a key fragment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTuple {
    pub secret: AttributeSecret,
    /// Attribute value, e.g. `MANUFACTURER`. The authority binding lives in
    /// `authority_id`; `label()` joins the two.
    pub value: String,
    pub authority_id: AuthorityId,
    pub attr_type: AttrType,
    pub expiry: ExpiryDate,
}

impl AttributeTuple {
    pub fn label(&self) -> AttributeLabel {
        AttributeLabel::new(self.value.clone(), self.authority_id)
    }
}

// ---------------------------------------------------------------------------
// Commitment
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl Commitment {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> CoreResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CoreError::InvalidInput(format!("bad commitment hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidInput("commitment must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// CommitmentCodec — deterministic binding of a tuple to its commitment
// ---------------------------------------------------------------------------

/// Pure function from an `AttributeTuple` to its `Commitment`.
///
/// The encoding is domain-tagged and length-prefixed so that no two distinct
/// tuples share an encoding: all five fields feed the digest.
pub struct CommitmentCodec;

impl CommitmentCodec {
    pub fn commit(tuple: &AttributeTuple) -> Commitment {
        let mut hasher = Sha256::new();
        hasher.update(COMMITMENT_DOMAIN);
        hasher.update(tuple.secret.as_bytes());
        hasher.update((tuple.value.len() as u32).to_le_bytes());
        hasher.update(tuple.value.as_bytes());
        hasher.update(tuple.authority_id.0.to_le_bytes());
        hasher.update([tuple.attr_type.code()]);
        hasher.update(tuple.expiry.0.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Commitment(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrType, AuthorityId, ExpiryDate};
    use std::collections::HashSet;

    fn tuple(secret_byte: u8, value: &str, authority: u32, expiry: u32) -> AttributeTuple {
        AttributeTuple {
            secret: AttributeSecret::from_bytes([secret_byte; 32]),
            value: value.to_string(),
            authority_id: AuthorityId(authority),
            attr_type: AttrType::classify(value),
            expiry: ExpiryDate(expiry),
        }
    }

    #[test]
    fn test_commitment_deterministic() {
        let t = tuple(0x11, "MANUFACTURER", 1, 20260101);
        assert_eq!(CommitmentCodec::commit(&t), CommitmentCodec::commit(&t));
    }

    #[test]
    fn test_every_field_feeds_the_commitment() {
        let base = tuple(0x11, "MANUFACTURER", 1, 20260101);
        let c = CommitmentCodec::commit(&base);

        let mut changed = base.clone();
        changed.secret = AttributeSecret::from_bytes([0x12; 32]);
        assert_ne!(CommitmentCodec::commit(&changed), c);

        let mut changed = base.clone();
        changed.value = "CUSTOMS".into();
        assert_ne!(CommitmentCodec::commit(&changed), c);

        let mut changed = base.clone();
        changed.authority_id = AuthorityId(2);
        assert_ne!(CommitmentCodec::commit(&changed), c);

        let mut changed = base.clone();
        changed.attr_type = AttrType::Role;
        assert_ne!(CommitmentCodec::commit(&changed), c);

        let mut changed = base.clone();
        changed.expiry = ExpiryDate(20270101);
        assert_ne!(CommitmentCodec::commit(&changed), c);
    }

    #[test]
    fn test_no_collisions_across_corpus() {
        let values = ["MANUFACTURER", "CUSTOMS", "LOGISTIC", "SALES_ROLE", "IT_DEPARTMENT"];
        let mut seen = HashSet::new();
        for secret in 0u8..8 {
            for value in values {
                for authority in 1..=4u32 {
                    for expiry in [20250101, 20260101, 20270101] {
                        let c = CommitmentCodec::commit(&tuple(secret, value, authority, expiry));
                        assert!(seen.insert(c), "collision for {value}@{authority}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_commitment_hex_roundtrip() {
        let c = CommitmentCodec::commit(&tuple(0x42, "MANUFACTURER", 1, 20260101));
        let back = Commitment::from_hex(&c.to_hex()).unwrap();
        assert_eq!(back, c);
        assert!(Commitment::from_hex("zz").is_err());
        assert!(Commitment::from_hex("abcd").is_err());
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = AttributeSecret::from_bytes([0x5a; 32]);
        assert!(!format!("{secret:?}").contains("5a5a"));
    }

    #[test]
    fn test_tuple_label() {
        let t = tuple(0x01, "MANUFACTURER", 3, 20260101);
        assert_eq!(t.label().to_string(), "MANUFACTURER@A3");
    }
}
