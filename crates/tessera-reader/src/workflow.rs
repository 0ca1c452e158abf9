//! The reader's decryption workflow.
//!
//! Proof generation is CPU-bound and happens before any connection is
//! opened. Fragment collection then visits one authority at a time; the
//! ciphertext is fetched through its ledger pointer and decrypted only
//! after the metadata matches exactly. Every failure is total: nothing is
//! written unless the whole flow succeeds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_core::{
    AttributeTuple, AuthorityId, CommitmentCodec, ContentStore, CurrentDate, Ledger,
    MetricsCollector, MessageId, ProcessInstanceId, ReaderGid, SliceId,
};
use tessera_policy::{decrypt_slice, CiphertextRecord, CiphertextSlice, PublicParameters};
use tessera_zk::{AttributeStatement, AttributeWitness, CircuitId, Proof, PublicSignals, ZkBackend};

use crate::aggregate::AggregatedKey;
use crate::client::AuthoritySession;
use crate::error::{ReaderError, ReaderResult};

/// One decryption job.
#[derive(Debug, Clone)]
pub struct DecryptionRequest {
    pub process_instance: ProcessInstanceId,
    pub message_id: MessageId,
    pub slice_id: Option<SliceId>,
    pub output_dir: PathBuf,
}

pub struct ReaderClient {
    gid: ReaderGid,
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    zk: Arc<dyn ZkBackend>,
    /// Key-issuance server address per authority.
    authorities: BTreeMap<AuthorityId, String>,
}

impl ReaderClient {
    pub fn new(
        gid: ReaderGid,
        ledger: Arc<dyn Ledger>,
        content: Arc<dyn ContentStore>,
        zk: Arc<dyn ZkBackend>,
        authorities: BTreeMap<AuthorityId, String>,
    ) -> Self {
        Self {
            gid,
            ledger,
            content,
            zk,
            authorities,
        }
    }

    pub fn gid(&self) -> &ReaderGid {
        &self.gid
    }

    /// Fetch the agreed parameters, requiring every known authority to point
    /// at the same blob.
    pub fn resolve_public_parameters(
        &self,
        process_instance: ProcessInstanceId,
    ) -> ReaderResult<PublicParameters> {
        let mut pointers = Vec::new();
        for &authority in self.authorities.keys() {
            let pointer = self
                .ledger
                .parameters_pointer(authority, process_instance)?
                .ok_or_else(|| {
                    ReaderError::ParametersUnavailable(format!(
                        "authority {authority} has not published parameters"
                    ))
                })?;
            pointers.push(pointer);
        }
        let Some(first) = pointers.first() else {
            return Err(ReaderError::ParametersUnavailable(
                "no authorities configured".into(),
            ));
        };
        if pointers.iter().any(|p| p != first) {
            return Err(ReaderError::ParametersUnavailable(
                "authorities disagree on the parameters pointer".into(),
            ));
        }
        let bytes = self
            .content
            .get(first)?
            .ok_or_else(|| ReaderError::RecordMissing(first.clone()))?;
        Ok(PublicParameters::from_canonical_bytes(&bytes)?)
    }

    /// Build all proofs, then collect one fragment per held tuple.
    pub fn collect_fragments(
        &self,
        process_instance: ProcessInstanceId,
        tuples: &[AttributeTuple],
        metrics: &MetricsCollector,
    ) -> ReaderResult<AggregatedKey> {
        // Proof generation happens off any connection.
        let phase = metrics.start_phase("generate-proofs");
        let mut proofs: Vec<(AuthorityId, Proof, PublicSignals)> = Vec::new();
        for tuple in tuples {
            let statement = AttributeStatement {
                commitment: CommitmentCodec::commit(tuple),
                current_date: CurrentDate::today(),
                authority_id: tuple.authority_id,
                attr_type: tuple.attr_type,
            };
            let witness = AttributeWitness {
                tuple: tuple.clone(),
            };
            let (proof, signals) =
                self.zk
                    .generate_proof(CircuitId::ProofOfAttribute, &witness, &statement)?;
            proofs.push((tuple.authority_id, proof, signals));
        }
        metrics.finish(phase);

        let phase = metrics.start_phase("collect-fragments");
        let mut aggregated = AggregatedKey::new(self.gid.clone());
        for (authority_id, proof, signals) in proofs {
            let addr = self
                .authorities
                .get(&authority_id)
                .ok_or(ReaderError::UnknownAuthority(authority_id))?;
            let mut session = AuthoritySession::connect(authority_id, addr.as_str())?;
            let partial = session.request_key_with_proof(
                &self.gid,
                process_instance,
                &self.gid,
                proof,
                signals,
            )?;
            session.disconnect()?;
            aggregated.merge(partial)?;
            tracing::info!(authority = %authority_id, "fragment collected");
        }
        metrics.finish(phase);
        Ok(aggregated)
    }

    /// The full flow: parameters, fragments, fetch, verify, decrypt, write.
    pub fn decrypt(
        &self,
        tuples: &[AttributeTuple],
        request: &DecryptionRequest,
        metrics: &MetricsCollector,
    ) -> ReaderResult<PathBuf> {
        let params = self.resolve_public_parameters(request.process_instance)?;
        let aggregated = self.collect_fragments(request.process_instance, tuples, metrics)?;
        let (file_name, payload) = self.open_record(&params, &aggregated, request)?;

        let path = request.output_dir.join(&file_name);
        std::fs::write(&path, payload)?;
        tracing::info!(path = %path.display(), "payload recovered");
        Ok(path)
    }

    /// Fetch the record, verify metadata, select the slice, decrypt.
    /// No filesystem output; the payload is returned.
    pub fn open_record(
        &self,
        params: &PublicParameters,
        aggregated: &AggregatedKey,
        request: &DecryptionRequest,
    ) -> ReaderResult<(String, Vec<u8>)> {
        let pointer = self
            .ledger
            .ciphertext_pointer(request.message_id)?
            .ok_or(ReaderError::PointerNotFound(request.message_id))?;
        let bytes = self
            .content
            .get(&pointer.content)?
            .ok_or_else(|| ReaderError::RecordMissing(pointer.content.clone()))?;
        let record = CiphertextRecord::from_bytes(&bytes)?;

        // Exact metadata match, all three fields.
        if record.metadata.sender != pointer.sender {
            return Err(ReaderError::MetadataMismatch(format!(
                "sender {} does not match pointer {}",
                record.metadata.sender, pointer.sender
            )));
        }
        if record.metadata.process_instance != request.process_instance {
            return Err(ReaderError::MetadataMismatch(format!(
                "process instance {} does not match requested {}",
                record.metadata.process_instance, request.process_instance
            )));
        }
        if record.metadata.message_id != request.message_id {
            return Err(ReaderError::MetadataMismatch(format!(
                "message id {} does not match requested {}",
                record.metadata.message_id, request.message_id
            )));
        }

        let slice = select_slice(&record, request.slice_id)?;
        let file_name = sanitize_file_name(&slice.file_name)?;

        // Coverage check before touching the key material, so the error
        // names what is missing.
        let missing = aggregated.missing_for(&slice.policy);
        if !missing.is_empty() {
            return Err(ReaderError::MissingFragment(missing));
        }

        let payload = decrypt_slice(params, &aggregated.fragments(), slice)?;
        Ok((file_name, payload))
    }
}

/// A sole slice is selected unconditionally; among several, only an exact
/// slice id match.
fn select_slice(
    record: &CiphertextRecord,
    slice_id: Option<SliceId>,
) -> ReaderResult<&CiphertextSlice> {
    match record.slices.as_slice() {
        [] => Err(ReaderError::InvalidRecord("record has no slices".into())),
        [only] => Ok(only),
        many => {
            let wanted = slice_id.ok_or(ReaderError::SliceNotFound(None))?;
            many.iter()
                .find(|s| s.slice_id == Some(wanted))
                .ok_or(ReaderError::SliceNotFound(Some(wanted)))
        }
    }
}

fn sanitize_file_name(name: &str) -> ReaderResult<String> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(ReaderError::InvalidRecord(format!(
            "unsafe file name in record: {name}"
        )));
    }
    Ok(name.to_string())
}

/// The reader's long-term signing identity for the handshake path.
pub struct ReaderSigner {
    key: ed25519_dalek::SigningKey,
}

impl ReaderSigner {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        Self {
            key: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }
}

impl tessera_core::Signer for ReaderSigner {
    fn sign(&self, message: &[u8]) -> tessera_core::CoreResult<[u8; 64]> {
        use ed25519_dalek::Signer as _;
        Ok(self.key.sign(message).to_bytes())
    }

    fn verifying_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

/// Sign a handshake nonce. The message is the decimal rendering of the
/// nonce, the form the server verifies against.
pub fn sign_nonce(signer: &dyn tessera_core::Signer, nonce: u64) -> ReaderResult<[u8; 64]> {
    Ok(signer.sign(nonce.to_string().as_bytes())?)
}

impl DecryptionRequest {
    pub fn new(
        process_instance: ProcessInstanceId,
        message_id: MessageId,
        slice_id: Option<SliceId>,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            process_instance,
            message_id,
            slice_id,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{AttributeLabel, ReaderGid};
    use tessera_policy::{PolicyExpr, RecordMetadata};

    fn slice(slice_id: Option<u64>, file_name: &str) -> CiphertextSlice {
        CiphertextSlice {
            slice_id: slice_id.map(SliceId),
            policy: "X@A1".parse::<PolicyExpr>().unwrap(),
            file_name: file_name.into(),
            key_material: vec![],
            payload_nonce: [0; 12],
            payload: vec![],
        }
    }

    fn record(slices: Vec<CiphertextSlice>) -> CiphertextRecord {
        CiphertextRecord {
            metadata: RecordMetadata {
                sender: ReaderGid::new("owner"),
                process_instance: ProcessInstanceId(1),
                message_id: MessageId(1),
            },
            slices,
        }
    }

    #[test]
    fn test_single_slice_selected_without_id() {
        let record = record(vec![slice(None, "a")]);
        assert_eq!(select_slice(&record, None).unwrap().file_name, "a");
    }

    #[test]
    fn test_multi_slice_requires_exact_id() {
        let record = record(vec![slice(Some(1), "a"), slice(Some(2), "b")]);
        assert_eq!(
            select_slice(&record, Some(SliceId(2))).unwrap().file_name,
            "b"
        );
        assert!(matches!(
            select_slice(&record, Some(SliceId(3))),
            Err(ReaderError::SliceNotFound(Some(SliceId(3))))
        ));
        assert!(matches!(
            select_slice(&record, None),
            Err(ReaderError::SliceNotFound(None))
        ));
    }

    #[test]
    fn test_empty_record_rejected() {
        let record = record(vec![]);
        assert!(matches!(
            select_slice(&record, None),
            Err(ReaderError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_file_name_sanitized() {
        assert_eq!(sanitize_file_name("report.json").unwrap(), "report.json");
        for bad in ["", "../x", "a/b", "a\\b", ".hidden"] {
            assert!(sanitize_file_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_sign_nonce_is_verifiable() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};
        use tessera_core::Signer as _;

        let signer = ReaderSigner::generate(&mut rand::rngs::OsRng);
        let signature = sign_nonce(&signer, 12345).unwrap();
        VerifyingKey::from_bytes(&signer.verifying_key())
            .unwrap()
            .verify(b"12345", &Signature::from_bytes(&signature))
            .unwrap();
    }

    #[test]
    fn test_missing_fragment_reported_before_decrypt() {
        let aggregated = AggregatedKey::new(ReaderGid::new("r"));
        let policy: PolicyExpr = "(A@A1 and B@A2)".parse().unwrap();
        let missing = aggregated.missing_for(&policy);
        assert_eq!(
            missing,
            vec![
                AttributeLabel::new("A", tessera_core::AuthorityId(1)),
                AttributeLabel::new("B", tessera_core::AuthorityId(2)),
            ]
        );
    }
}
