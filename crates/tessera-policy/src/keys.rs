//! Authority key material and fragment derivation.
//!
//! Every authority holds a per-process secret share. From it, it derives an
//! attribute public key (published on the ledger for data owners) and, per
//! certified label, the leaf key handed to readers as a `KeyFragment`.
//!
//! Reference scheme: derivations are HKDF-SHA-256 chains salted with the
//! public parameters. Functional access control only — the published
//! attribute key lets any holder derive leaf keys, which a pairing-based
//! production scheme would prevent. The seam is the function signatures.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroize;

use tessera_core::{hex_bytes, AttrType, AttributeLabel, AuthorityId, ProcessInstanceId, ReaderGid};

use crate::error::{PolicyError, PolicyResult};
use crate::params::PublicParameters;

fn hkdf_expand(ikm: &[u8], salt: &[u8; 32], info: &[u8]) -> PolicyResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|e| PolicyError::Derivation(e.to_string()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------------
// AuthorityKeyShare — the authority's private key share for one process
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorityKeyShare {
    pub authority_id: AuthorityId,
    pub process_instance: ProcessInstanceId,
    #[serde(with = "hex_bytes")]
    share: [u8; 32],
}

impl AuthorityKeyShare {
    pub fn generate<R: rand::RngCore>(
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        rng: &mut R,
    ) -> Self {
        let mut share = [0u8; 32];
        rng.fill_bytes(&mut share);
        Self {
            authority_id,
            process_instance,
            share,
        }
    }

    pub fn from_bytes(
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        share: [u8; 32],
    ) -> Self {
        Self {
            authority_id,
            process_instance,
            share,
        }
    }

    pub fn share_bytes(&self) -> &[u8; 32] {
        &self.share
    }

    /// The attribute public key published on the ledger.
    pub fn attribute_public_key(
        &self,
        params: &PublicParameters,
    ) -> PolicyResult<AttributePublicKey> {
        let info = format!("tessera.attr-enc.v1|{}", self.authority_id);
        let key = hkdf_expand(&self.share, &params.derivation_salt(), info.as_bytes())?;
        Ok(AttributePublicKey {
            authority_id: self.authority_id,
            key,
        })
    }

    /// Issue the fragment for one certified label, scoped to the reader.
    pub fn issue_fragment(
        &self,
        params: &PublicParameters,
        label: &AttributeLabel,
    ) -> PolicyResult<KeyFragment> {
        let public = self.attribute_public_key(params)?;
        let key = leaf_key(&public, params, label)?;
        Ok(KeyFragment {
            authority_id: self.authority_id,
            attr_type: label.attr_type(),
            label: label.clone(),
            key,
        })
    }
}

impl fmt::Debug for AuthorityKeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityKeyShare")
            .field("authority_id", &self.authority_id)
            .field("process_instance", &self.process_instance)
            .field("share", &"[REDACTED]")
            .finish()
    }
}

impl Drop for AuthorityKeyShare {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

// ---------------------------------------------------------------------------
// AttributePublicKey — published, used by data owners at encryption time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePublicKey {
    pub authority_id: AuthorityId,
    #[serde(with = "hex_bytes")]
    pub key: [u8; 32],
}

impl AttributePublicKey {
    pub fn from_ledger_bytes(authority_id: AuthorityId, bytes: &[u8]) -> PolicyResult<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PolicyError::Derivation("attribute public key must be 32 bytes".into()))?;
        Ok(Self { authority_id, key })
    }
}

/// The per-label leaf key both sides of the cipher derive.
pub fn leaf_key(
    public: &AttributePublicKey,
    params: &PublicParameters,
    label: &AttributeLabel,
) -> PolicyResult<[u8; 32]> {
    let info = format!("tessera.leaf.v1|{label}");
    hkdf_expand(&public.key, &params.derivation_salt(), info.as_bytes())
}

// ---------------------------------------------------------------------------
// KeyFragment / PartialKey
// ---------------------------------------------------------------------------

/// One authority's contribution to a reader's decryption key, scoped to a
/// single (authority, attribute type) cell.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFragment {
    pub authority_id: AuthorityId,
    pub attr_type: AttrType,
    pub label: AttributeLabel,
    #[serde(with = "hex_bytes")]
    pub key: [u8; 32],
}

impl fmt::Debug for KeyFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFragment")
            .field("authority_id", &self.authority_id)
            .field("attr_type", &self.attr_type)
            .field("label", &self.label.to_string())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// What a key-issuance server returns for one request: one fragment on the
/// proof path, possibly several on the handshake path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialKey {
    pub gid: ReaderGid,
    pub fragments: Vec<KeyFragment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamElement;
    use rand::rngs::OsRng;

    fn params() -> PublicParameters {
        PublicParameters::derive(
            ProcessInstanceId(42),
            &[ParamElement::random(&mut OsRng)],
            &[ParamElement::random(&mut OsRng)],
        )
    }

    #[test]
    fn test_fragment_matches_owner_side_leaf_key() {
        let params = params();
        let share = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(42), &mut OsRng);
        let label: AttributeLabel = "MANUFACTURER@A1".parse().unwrap();

        let fragment = share.issue_fragment(&params, &label).unwrap();
        let public = share.attribute_public_key(&params).unwrap();
        let owner_side = leaf_key(&public, &params, &label).unwrap();

        assert_eq!(fragment.key, owner_side);
        assert_eq!(fragment.attr_type, AttrType::Other);
    }

    #[test]
    fn test_fragments_differ_per_label() {
        let params = params();
        let share = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(42), &mut OsRng);
        let a = share
            .issue_fragment(&params, &"MANUFACTURER@A1".parse().unwrap())
            .unwrap();
        let b = share
            .issue_fragment(&params, &"CUSTOMS@A1".parse().unwrap())
            .unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_different_shares_different_keys() {
        let params = params();
        let label: AttributeLabel = "MANUFACTURER@A1".parse().unwrap();
        let s1 = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(42), &mut OsRng);
        let s2 = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(42), &mut OsRng);
        assert_ne!(
            s1.issue_fragment(&params, &label).unwrap().key,
            s2.issue_fragment(&params, &label).unwrap().key
        );
    }

    #[test]
    fn test_keys_bound_to_parameters() {
        let share = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(42), &mut OsRng);
        let label: AttributeLabel = "MANUFACTURER@A1".parse().unwrap();
        let f1 = share.issue_fragment(&params(), &label).unwrap();
        let f2 = share.issue_fragment(&params(), &label).unwrap();
        // Fresh random parameters give a different derivation salt
        assert_ne!(f1.key, f2.key);
    }

    #[test]
    fn test_share_debug_redacted() {
        let share = AuthorityKeyShare::from_bytes(
            AuthorityId(1),
            ProcessInstanceId(1),
            [0x77; 32],
        );
        assert!(!format!("{share:?}").contains("7777"));
    }

    #[test]
    fn test_public_key_ledger_roundtrip() {
        let params = params();
        let share = AuthorityKeyShare::generate(AuthorityId(2), ProcessInstanceId(42), &mut OsRng);
        let public = share.attribute_public_key(&params).unwrap();
        let back = AttributePublicKey::from_ledger_bytes(AuthorityId(2), &public.key).unwrap();
        assert_eq!(back, public);
        assert!(AttributePublicKey::from_ledger_bytes(AuthorityId(2), b"short").is_err());
    }
}
