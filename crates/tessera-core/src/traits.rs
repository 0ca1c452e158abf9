//! Trait seams to the external collaborators.
//!
//! The ledger is an append-only public bulletin board; the content store is
//! addressed by the hash of what it holds. Both are external services; the
//! traits here are the whole of what the protocol assumes about them.

use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::error::CoreResult;
use crate::types::{
    hex_bytes, AttrType, AuthorityId, ContentId, MessageId, ProcessInstanceId, ReaderGid,
};

// ---------------------------------------------------------------------------
// Ledger record types
// ---------------------------------------------------------------------------

/// Commit-phase record: SHA-256 commitments to the two parameter elements an
/// authority sampled, published before the elements themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCommitments {
    #[serde(with = "hex_bytes")]
    pub first: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub second: [u8; 32],
}

/// Reveal-phase record: the two parameter elements in compressed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedElements {
    #[serde(with = "hex_bytes")]
    pub first: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub second: [u8; 32],
}

/// Registry entry published by the certifier: the commitment for one
/// (reader, authority, attribute type) cell plus a pointer to the
/// certifier's bundle in the content store. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub process_instance: ProcessInstanceId,
    pub reader: ReaderGid,
    pub authority_id: AuthorityId,
    pub attr_type: AttrType,
    pub commitment: Commitment,
    pub bundle: ContentId,
}

/// Ledger record locating a ciphertext in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextPointer {
    pub message_id: MessageId,
    pub content: ContentId,
    pub sender: ReaderGid,
}

// ---------------------------------------------------------------------------
// Ledger — append-only public bulletin board
// ---------------------------------------------------------------------------

/// Typed operations against the ledger.
///
/// All writes are write-once: re-publishing the identical value is an
/// idempotent no-op, publishing a different value under an occupied key is
/// an error. Reads of absent keys return `Ok(None)`.
pub trait Ledger: Send + Sync {
    fn publish_element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        commitments: &ElementCommitments,
    ) -> CoreResult<()>;

    fn element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<ElementCommitments>>;

    fn publish_revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        elements: &RevealedElements,
    ) -> CoreResult<()>;

    fn revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<RevealedElements>>;

    fn publish_parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        pointer: &ContentId,
    ) -> CoreResult<()>;

    fn parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<ContentId>>;

    /// Attribute public key an authority derives for one process instance.
    fn publish_authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        key: &[u8],
    ) -> CoreResult<()>;

    fn authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<Vec<u8>>>;

    /// Long-term verifying key directory for readers.
    fn publish_reader_public_key(&self, reader: &ReaderGid, key: &[u8; 32]) -> CoreResult<()>;

    fn reader_public_key(&self, reader: &ReaderGid) -> CoreResult<Option<[u8; 32]>>;

    fn publish_registry_entry(&self, entry: &RegistryEntry) -> CoreResult<()>;

    fn registry_entry(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        authority_id: AuthorityId,
        attr_type: AttrType,
    ) -> CoreResult<Option<RegistryEntry>>;

    fn registry_entries_for_reader(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> CoreResult<Vec<RegistryEntry>>;

    fn publish_ciphertext_pointer(&self, pointer: &CiphertextPointer) -> CoreResult<()>;

    fn ciphertext_pointer(&self, message_id: MessageId) -> CoreResult<Option<CiphertextPointer>>;
}

// ---------------------------------------------------------------------------
// ContentStore — content-addressed blob storage
// ---------------------------------------------------------------------------

pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their content id (hex SHA-256).
    fn put(&self, bytes: &[u8]) -> CoreResult<ContentId>;

    /// Fetch bytes by content id. Implementations verify the digest of what
    /// they return.
    fn get(&self, id: &ContentId) -> CoreResult<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// Signer — the reader's long-term signing capability
// ---------------------------------------------------------------------------

pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> CoreResult<[u8; 64]>;
    fn verifying_key(&self) -> [u8; 32];
}
