//! The key-issuance server.
//!
//! One instance per authority. Accepts connections on an authenticated
//! stream (TLS termination belongs to the transport in front of the
//! listener), one handler per connection. Two request paths issue key
//! fragments: a signed handshake against the reader's published long-term
//! key, and a zero-knowledge proof of a certified attribute. Neither path
//! ever shows the server a reader's secret.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;

use tessera_certifier::AttributeBundle;
use tessera_core::{
    AttributeLabel, AuthorityId, ContentStore, CurrentDate, Ledger, ProcessInstanceId, ReaderGid,
};
use tessera_policy::{PartialKey, PublicParameters};
use tessera_zk::{CircuitId, Proof, PublicSignals, ZkBackend};

use crate::error::{AuthorityError, AuthorityResult, IssuanceError};
use crate::keystore::AuthorityStore;
use crate::nonces::NonceRegistry;
use crate::protocol::{read_frame, write_frame, Request, Response};

/// Per-connection request lifecycle, tracked for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    AwaitingRequest,
    HandshakePending,
    ProofVerify,
    KeyIssued,
    Rejected,
    Closed,
}

pub struct KeyIssuanceServer {
    authority_id: AuthorityId,
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    zk: Arc<dyn ZkBackend>,
    store: Arc<AuthorityStore>,
    nonces: NonceRegistry,
    proof_verification_enabled: bool,
}

impl KeyIssuanceServer {
    pub fn new(
        authority_id: AuthorityId,
        ledger: Arc<dyn Ledger>,
        content: Arc<dyn ContentStore>,
        zk: Arc<dyn ZkBackend>,
        store: Arc<AuthorityStore>,
    ) -> Self {
        Self {
            authority_id,
            ledger,
            content,
            zk,
            store,
            nonces: NonceRegistry::new(),
            proof_verification_enabled: true,
        }
    }

    /// Disable the proof path. Proof-carrying requests are then rejected
    /// outright; verification is never silently skipped.
    pub fn disable_proof_verification(mut self) -> Self {
        self.proof_verification_enabled = false;
        self
    }

    pub fn authority_id(&self) -> AuthorityId {
        self.authority_id
    }

    /// Accept loop: one spawned handler per connection.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> AuthorityResult<()> {
        let local = listener.local_addr()?;
        tracing::info!(authority = %self.authority_id, %local, "key-issuance server listening");
        for stream in listener.incoming() {
            match stream {
                Ok(mut stream) => {
                    let server = Arc::clone(&self);
                    std::thread::spawn(move || {
                        let peer = stream
                            .peer_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|_| "unknown".into());
                        tracing::info!(authority = %server.authority_id, %peer, "connection accepted");
                        if let Err(e) = server.handle_connection(&mut stream) {
                            tracing::warn!(%peer, error = %e, "connection handler failed");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
        Ok(())
    }

    /// Drive one connection until disconnect or end of stream.
    pub fn handle_connection<S: Read + Write>(&self, stream: &mut S) -> AuthorityResult<()> {
        let mut state = ConnectionState::Connected;
        tracing::debug!(?state, "connection established");
        loop {
            state = ConnectionState::AwaitingRequest;
            let Some(raw) = read_frame(stream)? else {
                break;
            };
            let request = match Request::parse(self.authority_id, &raw) {
                Ok(request) => request,
                Err(e) => {
                    state = ConnectionState::Rejected;
                    tracing::debug!(?state, error = %e, "unparseable command");
                    write_frame(stream, &Response::Error(e.to_string()).to_wire())?;
                    continue;
                }
            };
            if request == Request::Disconnect {
                state = ConnectionState::Closed;
                break;
            }
            let response = self.handle_request(&request, &mut state);
            write_frame(stream, &response.to_wire())?;
        }
        tracing::debug!(?state, "connection finished");
        Ok(())
    }

    /// Dispatch one parsed request.
    pub fn handle_request(&self, request: &Request, state: &mut ConnectionState) -> Response {
        match request {
            Request::StartHandshake {
                process_instance,
                reader,
            } => {
                *state = ConnectionState::HandshakePending;
                let nonce = self.nonces.issue(*process_instance, reader);
                tracing::info!(reader = %reader, process = %process_instance, "handshake started");
                Response::NumberToSign(nonce)
            }
            Request::GenerateKey {
                gid,
                process_instance,
                reader,
                signature,
            } => self.finish(
                state,
                reader,
                self.handle_signed(gid, *process_instance, reader, signature),
            ),
            Request::ZkGenerateKey {
                gid,
                process_instance,
                reader,
                proof,
                signals,
            } => {
                *state = ConnectionState::ProofVerify;
                self.finish(
                    state,
                    reader,
                    self.handle_proof(gid, *process_instance, reader, proof, signals),
                )
            }
            Request::Disconnect => {
                *state = ConnectionState::Closed;
                Response::Error("disconnect is not a request".into())
            }
        }
    }

    fn finish(
        &self,
        state: &mut ConnectionState,
        reader: &ReaderGid,
        outcome: Result<PartialKey, IssuanceError>,
    ) -> Response {
        match outcome {
            Ok(key) => {
                *state = ConnectionState::KeyIssued;
                tracing::info!(reader = %reader, fragments = key.fragments.len(), "key issued");
                Response::PartialKey(key)
            }
            Err(e) => {
                *state = ConnectionState::Rejected;
                tracing::warn!(reader = %reader, error = %e, "request rejected");
                Response::Error(e.to_string())
            }
        }
    }

    // -- handshake-signature path -------------------------------------------

    fn handle_signed(
        &self,
        gid: &ReaderGid,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        signature: &[u8; 64],
    ) -> Result<PartialKey, IssuanceError> {
        // The nonce is consumed now, before verification, so a failed
        // attempt cannot be replayed against the same challenge.
        let nonce = self
            .nonces
            .take(process_instance, reader)
            .ok_or(IssuanceError::HandshakeNotStarted)?;

        let key_bytes = self
            .ledger
            .reader_public_key(reader)
            .map_err(internal)?
            .ok_or(IssuanceError::UnknownReaderKey)?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| IssuanceError::HandshakeSignatureInvalid)?;
        let signature = Signature::from_bytes(signature);
        verifying_key
            .verify(nonce.to_string().as_bytes(), &signature)
            .map_err(|_| IssuanceError::HandshakeSignatureInvalid)?;

        let labels = self.certified_labels(process_instance, reader)?;
        if labels.is_empty() {
            return Err(IssuanceError::NotCertified);
        }
        self.issue(gid, process_instance, &labels)
    }

    // -- proof-gated path ---------------------------------------------------

    fn handle_proof(
        &self,
        gid: &ReaderGid,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        proof: &Proof,
        signals: &PublicSignals,
    ) -> Result<PartialKey, IssuanceError> {
        if !self.proof_verification_enabled {
            return Err(IssuanceError::ProofVerificationDisabled);
        }

        let valid = self
            .zk
            .verify_proof(CircuitId::ProofOfAttribute, proof, signals)
            .map_err(internal)?;
        if !valid {
            return Err(IssuanceError::ProofInvalid);
        }

        // Cross-authority issuance is refused even for a valid proof.
        let claimed = signals.authority_id().map_err(internal)?;
        if claimed != self.authority_id {
            return Err(IssuanceError::AuthorityMismatch {
                claimed,
                ours: self.authority_id,
            });
        }

        // The attested verification date must be the server's own date,
        // otherwise an expired attribute could be replayed with an old one.
        let proof_date = signals.current_date().map_err(internal)?;
        let today = CurrentDate::today();
        if proof_date != today {
            return Err(IssuanceError::ExpiredAttribute { proof_date, today });
        }

        // The commitment in the signals must be one this reader actually
        // published for this (authority, type) cell.
        let attr_type = signals.attr_type().map_err(internal)?;
        let entry = self
            .ledger
            .registry_entry(process_instance, reader, self.authority_id, attr_type)
            .map_err(internal)?
            .ok_or(IssuanceError::AttributeTypeMismatch)?;
        let claimed_commitment = signals.commitment().map_err(internal)?;
        if entry.commitment != claimed_commitment {
            return Err(IssuanceError::UnknownCommitment);
        }

        // Scope the fragment to exactly the proven (authority, type) cell.
        let labels = self.certified_labels(process_instance, reader)?;
        let label = labels
            .into_iter()
            .find(|l| l.attr_type() == attr_type)
            .ok_or(IssuanceError::AttributeTypeMismatch)?;
        self.issue(gid, process_instance, &[label])
    }

    // -- shared issuance ----------------------------------------------------

    fn certified_labels(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> Result<Vec<AttributeLabel>, IssuanceError> {
        let entries = self
            .ledger
            .registry_entries_for_reader(process_instance, reader)
            .map_err(internal)?;
        let Some(entry) = entries.iter().find(|e| e.authority_id == self.authority_id) else {
            return Ok(Vec::new());
        };
        let bundle_bytes = self
            .content
            .get(&entry.bundle)
            .map_err(internal)?
            .ok_or_else(|| IssuanceError::Internal("certifier bundle missing".into()))?;
        let bundle = AttributeBundle::from_bytes(&bundle_bytes).map_err(internal)?;
        Ok(bundle.labels_for(reader, self.authority_id))
    }

    fn issue(
        &self,
        gid: &ReaderGid,
        process_instance: ProcessInstanceId,
        labels: &[AttributeLabel],
    ) -> Result<PartialKey, IssuanceError> {
        let params = self.load_parameters(process_instance)?;
        let share = self
            .store
            .key_share(process_instance)
            .map_err(internal)?
            .ok_or_else(|| IssuanceError::Internal("no key share for process".into()))?;
        let fragments = labels
            .iter()
            .map(|label| share.issue_fragment(&params, label))
            .collect::<Result<Vec<_>, _>>()
            .map_err(internal)?;
        Ok(PartialKey {
            gid: gid.clone(),
            fragments,
        })
    }

    fn load_parameters(
        &self,
        process_instance: ProcessInstanceId,
    ) -> Result<PublicParameters, IssuanceError> {
        let pointer = self
            .ledger
            .parameters_pointer(self.authority_id, process_instance)
            .map_err(internal)?
            .ok_or_else(|| IssuanceError::Internal("public parameters not agreed".into()))?;
        let bytes = self
            .content
            .get(&pointer)
            .map_err(internal)?
            .ok_or_else(|| IssuanceError::Internal("parameters blob missing".into()))?;
        PublicParameters::from_canonical_bytes(&bytes).map_err(internal)
    }
}

fn internal<E: std::fmt::Display>(e: E) -> IssuanceError {
    IssuanceError::Internal(e.to_string())
}
