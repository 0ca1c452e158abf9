//! In-memory ledger and content store.
//!
//! The reference backends used by tests and single-process demos. Write-once
//! semantics match the public ledger contract: identical re-publish is
//! idempotent, divergent re-publish is an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tessera_core::{
    AttrType, AuthorityId, CiphertextPointer, ContentId, ContentStore, CoreError, CoreResult,
    ElementCommitments, Ledger, MessageId, ProcessInstanceId, ReaderGid, RegistryEntry,
    RevealedElements,
};

use crate::store::content_id_for;

fn write_once<K, V>(map: &mut HashMap<K, V>, key: K, value: V, what: &str) -> CoreResult<()>
where
    K: std::hash::Hash + Eq + fmt::Debug,
    V: PartialEq,
{
    match map.get(&key) {
        None => {
            map.insert(key, value);
            Ok(())
        }
        Some(existing) if *existing == value => Ok(()),
        Some(_) => Err(CoreError::AlreadyPublished(format!("{what}: {key:?}"))),
    }
}

#[derive(Default)]
struct LedgerState {
    element_commitments: HashMap<(AuthorityId, ProcessInstanceId, u32), ElementCommitments>,
    revealed_elements: HashMap<(AuthorityId, ProcessInstanceId, u32), RevealedElements>,
    parameter_pointers: HashMap<(AuthorityId, ProcessInstanceId), ContentId>,
    authority_public_keys: HashMap<(AuthorityId, ProcessInstanceId), Vec<u8>>,
    reader_public_keys: HashMap<ReaderGid, [u8; 32]>,
    registry: HashMap<(ProcessInstanceId, ReaderGid, AuthorityId, AttrType), RegistryEntry>,
    ciphertext_pointers: HashMap<MessageId, CiphertextPointer>,
}

/// Append-only ledger backed by process memory.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::Storage("ledger lock poisoned".into()))
    }
}

impl Ledger for InMemoryLedger {
    fn publish_element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        commitments: &ElementCommitments,
    ) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.element_commitments,
            (authority_id, process_instance, round),
            *commitments,
            "element commitments",
        )
    }

    fn element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<ElementCommitments>> {
        Ok(self
            .lock()?
            .element_commitments
            .get(&(authority_id, process_instance, round))
            .copied())
    }

    fn publish_revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        elements: &RevealedElements,
    ) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.revealed_elements,
            (authority_id, process_instance, round),
            *elements,
            "revealed elements",
        )
    }

    fn revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<RevealedElements>> {
        Ok(self
            .lock()?
            .revealed_elements
            .get(&(authority_id, process_instance, round))
            .copied())
    }

    fn publish_parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        pointer: &ContentId,
    ) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.parameter_pointers,
            (authority_id, process_instance),
            pointer.clone(),
            "parameters pointer",
        )
    }

    fn parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<ContentId>> {
        Ok(self
            .lock()?
            .parameter_pointers
            .get(&(authority_id, process_instance))
            .cloned())
    }

    fn publish_authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        key: &[u8],
    ) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.authority_public_keys,
            (authority_id, process_instance),
            key.to_vec(),
            "authority public key",
        )
    }

    fn authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<Vec<u8>>> {
        Ok(self
            .lock()?
            .authority_public_keys
            .get(&(authority_id, process_instance))
            .cloned())
    }

    fn publish_reader_public_key(&self, reader: &ReaderGid, key: &[u8; 32]) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.reader_public_keys,
            reader.clone(),
            *key,
            "reader public key",
        )
    }

    fn reader_public_key(&self, reader: &ReaderGid) -> CoreResult<Option<[u8; 32]>> {
        Ok(self.lock()?.reader_public_keys.get(reader).copied())
    }

    fn publish_registry_entry(&self, entry: &RegistryEntry) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.registry,
            (
                entry.process_instance,
                entry.reader.clone(),
                entry.authority_id,
                entry.attr_type,
            ),
            entry.clone(),
            "registry entry",
        )
    }

    fn registry_entry(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        authority_id: AuthorityId,
        attr_type: AttrType,
    ) -> CoreResult<Option<RegistryEntry>> {
        Ok(self
            .lock()?
            .registry
            .get(&(process_instance, reader.clone(), authority_id, attr_type))
            .cloned())
    }

    fn registry_entries_for_reader(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> CoreResult<Vec<RegistryEntry>> {
        let state = self.lock()?;
        let mut entries: Vec<RegistryEntry> = state
            .registry
            .values()
            .filter(|e| e.process_instance == process_instance && e.reader == *reader)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.authority_id, e.attr_type));
        Ok(entries)
    }

    fn publish_ciphertext_pointer(&self, pointer: &CiphertextPointer) -> CoreResult<()> {
        write_once(
            &mut self.lock()?.ciphertext_pointers,
            pointer.message_id,
            pointer.clone(),
            "ciphertext pointer",
        )
    }

    fn ciphertext_pointer(&self, message_id: MessageId) -> CoreResult<Option<CiphertextPointer>> {
        Ok(self.lock()?.ciphertext_pointers.get(&message_id).cloned())
    }
}

/// Content-addressed store backed by process memory.
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: Mutex<HashMap<ContentId, Vec<u8>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for InMemoryContentStore {
    fn put(&self, bytes: &[u8]) -> CoreResult<ContentId> {
        let id = content_id_for(bytes);
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| CoreError::ContentStore("store lock poisoned".into()))?;
        blobs.entry(id.clone()).or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn get(&self, id: &ContentId) -> CoreResult<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| CoreError::ContentStore("store lock poisoned".into()))?;
        match blobs.get(id) {
            None => Ok(None),
            Some(bytes) => {
                if content_id_for(bytes) != *id {
                    return Err(CoreError::ContentDigestMismatch(id.to_string()));
                }
                Ok(Some(bytes.clone()))
            }
        }
    }
}
