//! Proving backends.
//!
//! `ZkBackend` is the capability seam; `ReferenceBackend` is a simulated
//! prover for development and tests. It evaluates the circuit relation in
//! the clear and emits a digest binding over the public signals, so an
//! unsatisfied witness or a tampered signal fails verification — but it
//! offers no soundness against a malicious prover. Production deployments
//! plug a real SNARK toolchain behind the same trait.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use tessera_core::CommitmentCodec;

use crate::error::ZkResult;
use crate::types::{AttributeStatement, AttributeWitness, CircuitId, Proof, PublicSignals};

/// Domain tags for the simulated proof binding.
const VALID_TAG: &[u8] = b"tessera.zk.proof.v1.valid";
const UNSATISFIED_TAG: &[u8] = b"tessera.zk.proof.v1.unsatisfied";

pub trait ZkBackend: Send + Sync {
    /// Produce a proof and its public signals for the statement. Generation
    /// succeeds even for an unsatisfied witness; the resulting proof simply
    /// never verifies, as a proof from an invalid witness would not.
    fn generate_proof(
        &self,
        circuit: CircuitId,
        witness: &AttributeWitness,
        statement: &AttributeStatement,
    ) -> ZkResult<(Proof, PublicSignals)>;

    fn verify_proof(
        &self,
        circuit: CircuitId,
        proof: &Proof,
        signals: &PublicSignals,
    ) -> ZkResult<bool>;
}

/// Simulated proving backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }

    /// The relation of the `proof_of_attribute` circuit: the witness opens
    /// the public commitment, is unexpired at the public date, and belongs
    /// to the public authority and attribute type.
    fn relation_satisfied(witness: &AttributeWitness, statement: &AttributeStatement) -> bool {
        let tuple = &witness.tuple;
        CommitmentCodec::commit(tuple) == statement.commitment
            && tuple.expiry.is_valid_at(statement.current_date)
            && tuple.authority_id == statement.authority_id
            && tuple.attr_type == statement.attr_type
    }

    fn binding(tag: &[u8], circuit: CircuitId, signals: &PublicSignals) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(tag);
        hasher.update(circuit.as_str().as_bytes());
        for signal in &signals.0 {
            hasher.update((signal.len() as u32).to_le_bytes());
            hasher.update(signal.as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        bytes
    }
}

impl ZkBackend for ReferenceBackend {
    fn generate_proof(
        &self,
        circuit: CircuitId,
        witness: &AttributeWitness,
        statement: &AttributeStatement,
    ) -> ZkResult<(Proof, PublicSignals)> {
        let signals = statement.to_signals();
        let satisfied = Self::relation_satisfied(witness, statement);
        if !satisfied {
            tracing::debug!(%circuit, "witness does not satisfy the relation");
        }
        let tag = if satisfied { VALID_TAG } else { UNSATISFIED_TAG };
        let proof = Proof(Self::binding(tag, circuit, &signals).to_vec());
        Ok((proof, signals))
    }

    fn verify_proof(
        &self,
        circuit: CircuitId,
        proof: &Proof,
        signals: &PublicSignals,
    ) -> ZkResult<bool> {
        let expected = Self::binding(VALID_TAG, circuit, signals);
        Ok(proof.as_bytes().ct_eq(&expected).into())
    }
}
