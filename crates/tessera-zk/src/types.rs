//! Proof, signal, witness and statement types.
//!
//! Public signals are an ordered list of strings (the proving toolchain
//! convention): `[commitment_hex, current_date, authority_id, attr_type]`.
//! The secret and the attribute value never appear in the signals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tessera_core::{AttrType, AttributeTuple, AuthorityId, Commitment, CurrentDate};

use crate::error::{ZkError, ZkResult};

// ---------------------------------------------------------------------------
// CircuitId
// ---------------------------------------------------------------------------

/// Identifier of a compiled circuit known to the proving backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitId {
    /// Knowledge of an attribute tuple matching a published commitment,
    /// unexpired at the stated date, owned by the stated authority and type.
    ProofOfAttribute,
}

impl CircuitId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::ProofOfAttribute => "proof_of_attribute",
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CircuitId {
    type Err = ZkError;

    fn from_str(s: &str) -> ZkResult<Self> {
        match s {
            "proof_of_attribute" => Ok(CircuitId::ProofOfAttribute),
            other => Err(ZkError::UnknownCircuit(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Proof — opaque bytes
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct Proof(pub Vec<u8>);

impl Proof {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Proof {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Proof {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Proof).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proof({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// PublicSignals
// ---------------------------------------------------------------------------

/// Ordered public signals of a `proof_of_attribute` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSignals(pub Vec<String>);

impl PublicSignals {
    fn field(&self, index: usize, what: &str) -> ZkResult<&str> {
        self.0
            .get(index)
            .map(|s| s.as_str())
            .ok_or_else(|| ZkError::MalformedSignals(format!("missing {what} signal")))
    }

    pub fn commitment(&self) -> ZkResult<Commitment> {
        let hex = self.field(0, "commitment")?;
        Commitment::from_hex(hex).map_err(|e| ZkError::MalformedSignals(e.to_string()))
    }

    pub fn current_date(&self) -> ZkResult<CurrentDate> {
        let raw = self.field(1, "current date")?;
        raw.parse::<u32>()
            .map(CurrentDate)
            .map_err(|_| ZkError::MalformedSignals(format!("bad current date: {raw}")))
    }

    pub fn authority_id(&self) -> ZkResult<AuthorityId> {
        let raw = self.field(2, "authority id")?;
        raw.parse::<u32>()
            .map(AuthorityId)
            .map_err(|_| ZkError::MalformedSignals(format!("bad authority id: {raw}")))
    }

    pub fn attr_type(&self) -> ZkResult<AttrType> {
        let raw = self.field(3, "attribute type")?;
        let code: u8 = raw
            .parse()
            .map_err(|_| ZkError::MalformedSignals(format!("bad attribute type: {raw}")))?;
        AttrType::from_code(code).map_err(|e| ZkError::MalformedSignals(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Witness and statement
// ---------------------------------------------------------------------------

/// Private circuit inputs: the reader's attribute tuple. The tuple's secret
/// zeroizes itself on drop; Debug shows nothing sensitive.
#[derive(Clone)]
pub struct AttributeWitness {
    pub tuple: AttributeTuple,
}

impl fmt::Debug for AttributeWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeWitness")
            .field("tuple", &"[REDACTED]")
            .finish()
    }
}

/// Public circuit inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeStatement {
    /// The previously published commitment the witness must open.
    pub commitment: Commitment,
    /// Verification date the expiry is checked against.
    pub current_date: CurrentDate,
    /// Authority expected to serve the resulting key request.
    pub authority_id: AuthorityId,
    pub attr_type: AttrType,
}

impl AttributeStatement {
    pub fn to_signals(&self) -> PublicSignals {
        PublicSignals(vec![
            self.commitment.to_hex(),
            self.current_date.to_string(),
            self.authority_id.to_string(),
            self.attr_type.code().to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_id_roundtrip() {
        let id: CircuitId = "proof_of_attribute".parse().unwrap();
        assert_eq!(id, CircuitId::ProofOfAttribute);
        assert!("proof_of_nothing".parse::<CircuitId>().is_err());
    }

    #[test]
    fn test_statement_signals_roundtrip() {
        let statement = AttributeStatement {
            commitment: Commitment([0xcd; 32]),
            current_date: CurrentDate(20250101),
            authority_id: AuthorityId(3),
            attr_type: AttrType::Department,
        };
        let signals = statement.to_signals();
        assert_eq!(signals.commitment().unwrap(), statement.commitment);
        assert_eq!(signals.current_date().unwrap(), CurrentDate(20250101));
        assert_eq!(signals.authority_id().unwrap(), AuthorityId(3));
        assert_eq!(signals.attr_type().unwrap(), AttrType::Department);
    }

    #[test]
    fn test_malformed_signals_rejected() {
        let signals = PublicSignals(vec!["zz".into()]);
        assert!(signals.commitment().is_err());
        assert!(signals.current_date().is_err());
        let signals = PublicSignals(vec![
            Commitment([0; 32]).to_hex(),
            "not-a-date".into(),
            "1".into(),
            "0".into(),
        ]);
        assert!(signals.current_date().is_err());
    }

    #[test]
    fn test_proof_debug_opaque() {
        let proof = Proof(vec![0xde, 0xad]);
        assert_eq!(format!("{proof:?}"), "Proof(2 bytes)");
    }
}
