//! Parameter-group algebra for distributed setup.
//!
//! Each authority samples elements of the Ristretto group, commits to them
//! with SHA-256, and later reveals them. The agreed public parameters are
//! the group-law combination of every authority's revealed elements, so any
//! party holding the same ledger state derives byte-identical parameters.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::traits::Identity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tessera_core::{hex_bytes, ProcessInstanceId};

use crate::error::{PolicyError, PolicyResult};

// ---------------------------------------------------------------------------
// ParamElement
// ---------------------------------------------------------------------------

/// One element of the parameter-generation space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamElement(RistrettoPoint);

impl ParamElement {
    pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        Self(RistrettoPoint::random(rng))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> PolicyResult<Self> {
        CompressedRistretto::from_slice(bytes)
            .map_err(|e| PolicyError::InvalidElement(e.to_string()))?
            .decompress()
            .map(Self)
            .ok_or_else(|| PolicyError::InvalidElement("not a canonical group element".into()))
    }

    /// One-way commitment to this element, published before the reveal.
    pub fn commitment(&self) -> [u8; 32] {
        let digest = Sha256::digest(self.to_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        bytes
    }

    /// Combine revealed elements with the group law. Associative and
    /// commutative, so every authority derives the same result whatever
    /// order the ledger returns entries in.
    pub fn combine<I: IntoIterator<Item = ParamElement>>(elements: I) -> Self {
        let sum = elements
            .into_iter()
            .fold(RistrettoPoint::identity(), |acc, e| acc + e.0);
        Self(sum)
    }
}

// ---------------------------------------------------------------------------
// PublicParameters
// ---------------------------------------------------------------------------

/// The agreed parameters of one process instance: the combined element pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicParameters {
    pub process_instance: ProcessInstanceId,
    #[serde(with = "hex_bytes")]
    pub element_one: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub element_two: [u8; 32],
}

impl PublicParameters {
    pub fn derive(
        process_instance: ProcessInstanceId,
        first_elements: &[ParamElement],
        second_elements: &[ParamElement],
    ) -> Self {
        Self {
            process_instance,
            element_one: ParamElement::combine(first_elements.iter().copied()).to_bytes(),
            element_two: ParamElement::combine(second_elements.iter().copied()).to_bytes(),
        }
    }

    /// Canonical byte form, used for content addressing and as key-derivation
    /// salt. Field order is fixed by the struct definition.
    pub fn to_canonical_bytes(&self) -> PolicyResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PolicyError::Serialization(e.to_string()))
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> PolicyResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PolicyError::Serialization(e.to_string()))
    }

    /// Salt binding derived keys to these parameters.
    pub fn derivation_salt(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"tessera.params.salt.v1");
        hasher.update(self.process_instance.0.to_le_bytes());
        hasher.update(self.element_one);
        hasher.update(self.element_two);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_element_roundtrip() {
        let e = ParamElement::random(&mut OsRng);
        let back = ParamElement::from_bytes(&e.to_bytes()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_invalid_element_rejected() {
        // Not every 32-byte string is a canonical encoding
        assert!(ParamElement::from_bytes(&[0xff; 32]).is_err());
    }

    #[test]
    fn test_commitment_binds_element() {
        let a = ParamElement::random(&mut OsRng);
        let b = ParamElement::random(&mut OsRng);
        assert_eq!(a.commitment(), a.commitment());
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn test_combine_is_order_independent() {
        let elements: Vec<ParamElement> =
            (0..4).map(|_| ParamElement::random(&mut OsRng)).collect();
        let mut reversed = elements.clone();
        reversed.reverse();
        assert_eq!(
            ParamElement::combine(elements).to_bytes(),
            ParamElement::combine(reversed).to_bytes()
        );
    }

    #[test]
    fn test_parameters_byte_identical_across_derivations() {
        let process = ProcessInstanceId(42);
        let firsts: Vec<ParamElement> = (0..3).map(|_| ParamElement::random(&mut OsRng)).collect();
        let seconds: Vec<ParamElement> =
            (0..3).map(|_| ParamElement::random(&mut OsRng)).collect();
        let p1 = PublicParameters::derive(process, &firsts, &seconds);
        let p2 = PublicParameters::derive(process, &firsts, &seconds);
        assert_eq!(
            p1.to_canonical_bytes().unwrap(),
            p2.to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_parameters_canonical_roundtrip() {
        let process = ProcessInstanceId(7);
        let firsts = vec![ParamElement::random(&mut OsRng)];
        let seconds = vec![ParamElement::random(&mut OsRng)];
        let params = PublicParameters::derive(process, &firsts, &seconds);
        let bytes = params.to_canonical_bytes().unwrap();
        let back = PublicParameters::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_salt_depends_on_parameters() {
        let firsts = vec![ParamElement::random(&mut OsRng)];
        let seconds = vec![ParamElement::random(&mut OsRng)];
        let p1 = PublicParameters::derive(ProcessInstanceId(1), &firsts, &seconds);
        let p2 = PublicParameters::derive(ProcessInstanceId(2), &firsts, &seconds);
        assert_ne!(p1.derivation_salt(), p2.derivation_salt());
    }
}
