//! Policy-gated encryption and decryption.
//!
//! A random content key encrypts the payload with AES-256-GCM. The content
//! key is secret-shared down the policy tree — an AND node splits its share
//! with XOR, an OR node hands the same share to both children — and each
//! leaf share is wrapped under that label's leaf key. Decryption holds leaf
//! keys only for the fragments the reader was issued; an unsatisfied policy
//! leaves the content key unrecoverable and produces no output at all.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

use tessera_core::{
    hex_bytes, AttributeLabel, AuthorityId, MessageId, ProcessInstanceId, ReaderGid, SliceId,
};

use crate::error::{PolicyError, PolicyResult};
use crate::expr::PolicyExpr;
use crate::keys::{leaf_key, AttributePublicKey, KeyFragment};
use crate::params::PublicParameters;

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// Sender and addressing metadata a reader must match exactly before
/// attempting decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub sender: ReaderGid,
    pub process_instance: ProcessInstanceId,
    pub message_id: MessageId,
}

/// One leaf share of the content key, wrapped under the label's leaf key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedShare {
    pub index: u32,
    pub label: AttributeLabel,
    #[serde(with = "hex_bytes")]
    pub nonce: [u8; 12],
    #[serde(with = "b64_bytes")]
    pub wrapped: Vec<u8>,
}

/// One encrypted slice: a policy, the wrapped key material, and the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextSlice {
    pub slice_id: Option<SliceId>,
    pub policy: PolicyExpr,
    pub file_name: String,
    pub key_material: Vec<WrappedShare>,
    #[serde(with = "hex_bytes")]
    pub payload_nonce: [u8; 12],
    #[serde(with = "b64_bytes")]
    pub payload: Vec<u8>,
}

/// The complete stored document: metadata plus one or more slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextRecord {
    pub metadata: RecordMetadata,
    pub slices: Vec<CiphertextSlice>,
}

impl CiphertextRecord {
    pub fn to_bytes(&self) -> PolicyResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PolicyError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> PolicyResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PolicyError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// AES helpers
// ---------------------------------------------------------------------------

fn aes_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> PolicyResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PolicyError::EncryptionFailed(e.to_string()))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| PolicyError::EncryptionFailed("aead seal failed".into()))
}

fn aes_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    aad: &[u8],
) -> PolicyResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PolicyError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| PolicyError::DecryptionFailed("authentication failed".into()))
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

// ---------------------------------------------------------------------------
// Share splitting and recovery
// ---------------------------------------------------------------------------

/// In-order assignment of shares to leaves. The traversal order is the
/// contract between the two sides; `index` records it explicitly.
fn split_shares<R: rand::RngCore>(
    expr: &PolicyExpr,
    share: [u8; 32],
    rng: &mut R,
    next_index: &mut u32,
    out: &mut Vec<(u32, AttributeLabel, [u8; 32])>,
) {
    match expr {
        PolicyExpr::Leaf(label) => {
            out.push((*next_index, label.clone(), share));
            *next_index += 1;
        }
        PolicyExpr::And(l, r) => {
            let mut blind = [0u8; 32];
            rng.fill_bytes(&mut blind);
            let other = xor32(&share, &blind);
            split_shares(l, blind, rng, next_index, out);
            split_shares(r, other, rng, next_index, out);
        }
        PolicyExpr::Or(l, r) => {
            split_shares(l, share, rng, next_index, out);
            split_shares(r, share, rng, next_index, out);
        }
    }
}

/// Mirror of `split_shares`: recover the share at each node from whichever
/// leaves the reader can unwrap. The index counter advances through every
/// leaf whether or not it is usable, keeping both traversals aligned.
fn recover_share(
    expr: &PolicyExpr,
    keys: &BTreeMap<AttributeLabel, [u8; 32]>,
    wrapped: &BTreeMap<u32, &WrappedShare>,
    next_index: &mut u32,
) -> PolicyResult<Option<[u8; 32]>> {
    match expr {
        PolicyExpr::Leaf(label) => {
            let index = *next_index;
            *next_index += 1;
            let Some(key) = keys.get(label) else {
                return Ok(None);
            };
            let share = wrapped
                .get(&index)
                .ok_or_else(|| {
                    PolicyError::DecryptionFailed(format!("missing wrapped share {index}"))
                })
                .and_then(|w| aes_decrypt(key, &w.nonce, &w.wrapped, &[]))?;
            let share: [u8; 32] = share
                .try_into()
                .map_err(|_| PolicyError::DecryptionFailed("share must be 32 bytes".into()))?;
            Ok(Some(share))
        }
        PolicyExpr::And(l, r) => {
            let left = recover_share(l, keys, wrapped, next_index)?;
            let right = recover_share(r, keys, wrapped, next_index)?;
            Ok(match (left, right) {
                (Some(a), Some(b)) => Some(xor32(&a, &b)),
                _ => None,
            })
        }
        PolicyExpr::Or(l, r) => {
            let left = recover_share(l, keys, wrapped, next_index)?;
            let right = recover_share(r, keys, wrapped, next_index)?;
            Ok(left.or(right))
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Encrypt one payload under a policy, using the published attribute public
/// keys of every authority the policy mentions.
pub fn encrypt_slice<R: rand::RngCore + rand::CryptoRng>(
    params: &PublicParameters,
    authority_keys: &BTreeMap<AuthorityId, AttributePublicKey>,
    policy: &PolicyExpr,
    file_name: &str,
    payload: &[u8],
    slice_id: Option<SliceId>,
    rng: &mut R,
) -> PolicyResult<CiphertextSlice> {
    let mut content_key = [0u8; 32];
    rng.fill_bytes(&mut content_key);

    let mut assignments = Vec::new();
    let mut next_index = 0;
    split_shares(policy, content_key, rng, &mut next_index, &mut assignments);

    let mut key_material = Vec::with_capacity(assignments.len());
    for (index, label, mut share) in assignments {
        let public = authority_keys.get(&label.authority_id).ok_or_else(|| {
            PolicyError::EncryptionFailed(format!(
                "no attribute public key for authority {}",
                label.authority_id
            ))
        })?;
        let key = leaf_key(public, params, &label)?;
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);
        let wrapped = aes_encrypt(&key, &nonce, &share, &[])?;
        share.zeroize();
        key_material.push(WrappedShare {
            index,
            label,
            nonce,
            wrapped,
        });
    }

    let mut payload_nonce = [0u8; 12];
    rng.fill_bytes(&mut payload_nonce);
    // The parameter salt as associated data ties the payload to the agreed
    // parameters: a fragment from a different agreement cannot open it.
    let sealed = aes_encrypt(
        &content_key,
        &payload_nonce,
        payload,
        &params.derivation_salt(),
    )?;
    content_key.zeroize();

    Ok(CiphertextSlice {
        slice_id,
        policy: policy.clone(),
        file_name: file_name.to_string(),
        key_material,
        payload_nonce,
        payload: sealed,
    })
}

/// Decrypt one slice with the fragments a reader has aggregated.
///
/// Fails — with no partial output — when the fragments do not satisfy the
/// slice's policy or any unwrap step does not authenticate.
pub fn decrypt_slice(
    params: &PublicParameters,
    fragments: &[KeyFragment],
    slice: &CiphertextSlice,
) -> PolicyResult<Vec<u8>> {
    let keys: BTreeMap<AttributeLabel, [u8; 32]> = fragments
        .iter()
        .map(|f| (f.label.clone(), f.key))
        .collect();

    let held = keys.keys().cloned().collect();
    if !slice.policy.is_satisfied_by(&held) {
        return Err(PolicyError::NotSatisfied {
            missing: slice.policy.missing_labels(&held),
        });
    }

    let wrapped: BTreeMap<u32, &WrappedShare> =
        slice.key_material.iter().map(|w| (w.index, w)).collect();

    let mut next_index = 0;
    let content_key = recover_share(&slice.policy, &keys, &wrapped, &mut next_index)?
        .ok_or_else(|| PolicyError::DecryptionFailed("content key unrecoverable".into()))?;

    aes_decrypt(
        &content_key,
        &slice.payload_nonce,
        &slice.payload,
        &params.derivation_salt(),
    )
}

// ---------------------------------------------------------------------------
// Base64 serialization helper for variable-length byte strings
// ---------------------------------------------------------------------------

mod b64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AuthorityKeyShare;
    use crate::params::ParamElement;
    use rand::rngs::OsRng;

    struct Fixture {
        params: PublicParameters,
        shares: BTreeMap<AuthorityId, AuthorityKeyShare>,
        public_keys: BTreeMap<AuthorityId, AttributePublicKey>,
    }

    fn fixture(authorities: &[u32]) -> Fixture {
        let params = PublicParameters::derive(
            ProcessInstanceId(42),
            &[ParamElement::random(&mut OsRng)],
            &[ParamElement::random(&mut OsRng)],
        );
        let mut shares = BTreeMap::new();
        let mut public_keys = BTreeMap::new();
        for &a in authorities {
            let share = AuthorityKeyShare::generate(AuthorityId(a), ProcessInstanceId(42), &mut OsRng);
            public_keys.insert(AuthorityId(a), share.attribute_public_key(&params).unwrap());
            shares.insert(AuthorityId(a), share);
        }
        Fixture {
            params,
            shares,
            public_keys,
        }
    }

    fn fragments(fixture: &Fixture, labels: &[&str]) -> Vec<KeyFragment> {
        labels
            .iter()
            .map(|s| {
                let label: AttributeLabel = s.parse().unwrap();
                fixture.shares[&label.authority_id]
                    .issue_fragment(&fixture.params, &label)
                    .unwrap()
            })
            .collect()
    }

    fn encrypt(fixture: &Fixture, policy: &str, payload: &[u8]) -> CiphertextSlice {
        encrypt_slice(
            &fixture.params,
            &fixture.public_keys,
            &policy.parse().unwrap(),
            "shipment.json",
            payload,
            None,
            &mut OsRng,
        )
        .unwrap()
    }

    #[test]
    fn test_or_policy_either_branch_decrypts() {
        let fixture = fixture(&[1]);
        let slice = encrypt(&fixture, "(MANUFACTURER@A1 or CUSTOMS@A1)", b"exact payload");

        for label in ["MANUFACTURER@A1", "CUSTOMS@A1"] {
            let frags = fragments(&fixture, &[label]);
            let plain = decrypt_slice(&fixture.params, &frags, &slice).unwrap();
            assert_eq!(plain, b"exact payload");
        }
    }

    #[test]
    fn test_unrelated_fragment_fails_without_output() {
        let fixture = fixture(&[1]);
        let slice = encrypt(&fixture, "(MANUFACTURER@A1 or CUSTOMS@A1)", b"secret");
        let frags = fragments(&fixture, &["LOGISTIC@A1"]);
        let err = decrypt_slice(&fixture.params, &frags, &slice).unwrap_err();
        assert!(matches!(err, PolicyError::NotSatisfied { .. }));
    }

    #[test]
    fn test_and_policy_requires_both() {
        let fixture = fixture(&[1, 2]);
        let slice = encrypt(&fixture, "(MANUFACTURER@A1 and CUSTOMS@A2)", b"both needed");

        let both = fragments(&fixture, &["MANUFACTURER@A1", "CUSTOMS@A2"]);
        assert_eq!(
            decrypt_slice(&fixture.params, &both, &slice).unwrap(),
            b"both needed"
        );

        for partial in [&["MANUFACTURER@A1"][..], &["CUSTOMS@A2"][..]] {
            let frags = fragments(&fixture, partial);
            let err = decrypt_slice(&fixture.params, &frags, &slice).unwrap_err();
            assert!(matches!(err, PolicyError::NotSatisfied { .. }));
        }
    }

    #[test]
    fn test_nested_policy() {
        let fixture = fixture(&[1, 2, 3]);
        let slice = encrypt(
            &fixture,
            "((MANUFACTURER@A1 and CUSTOMS@A2) or SUPERVISOR@A3)",
            b"nested",
        );

        let via_and = fragments(&fixture, &["MANUFACTURER@A1", "CUSTOMS@A2"]);
        assert_eq!(
            decrypt_slice(&fixture.params, &via_and, &slice).unwrap(),
            b"nested"
        );

        let via_or = fragments(&fixture, &["SUPERVISOR@A3"]);
        assert_eq!(
            decrypt_slice(&fixture.params, &via_or, &slice).unwrap(),
            b"nested"
        );

        let insufficient = fragments(&fixture, &["MANUFACTURER@A1"]);
        assert!(decrypt_slice(&fixture.params, &insufficient, &slice).is_err());
    }

    #[test]
    fn test_duplicate_label_in_policy() {
        let fixture = fixture(&[1, 2]);
        let slice = encrypt(
            &fixture,
            "((MANUFACTURER@A1 and CUSTOMS@A2) or MANUFACTURER@A1)",
            b"dup",
        );
        let frags = fragments(&fixture, &["MANUFACTURER@A1"]);
        assert_eq!(decrypt_slice(&fixture.params, &frags, &slice).unwrap(), b"dup");
    }

    #[test]
    fn test_wrong_process_fragment_fails_authentication() {
        let fixture = fixture(&[1]);
        let slice = encrypt(&fixture, "MANUFACTURER@A1", b"bound");

        // A fragment issued under different parameters holds a different
        // leaf key, so the wrapped share fails to authenticate.
        let other = self::fixture(&[1]);
        let frags = fragments(&other, &["MANUFACTURER@A1"]);
        let err = decrypt_slice(&fixture.params, &frags, &slice).unwrap_err();
        assert!(matches!(err, PolicyError::DecryptionFailed(_)));
    }

    #[test]
    fn test_encrypt_requires_authority_key() {
        let fixture = fixture(&[1]);
        let err = encrypt_slice(
            &fixture.params,
            &fixture.public_keys,
            &"MANUFACTURER@A9".parse().unwrap(),
            "f",
            b"x",
            None,
            &mut OsRng,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::EncryptionFailed(_)));
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let fixture = fixture(&[1]);
        let slice = encrypt(&fixture, "MANUFACTURER@A1", b"payload");
        let record = CiphertextRecord {
            metadata: RecordMetadata {
                sender: ReaderGid::new("owner"),
                process_instance: ProcessInstanceId(42),
                message_id: MessageId(7),
            },
            slices: vec![slice],
        };
        let bytes = record.to_bytes().unwrap();
        let back = CiphertextRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back, record);
    }
}
