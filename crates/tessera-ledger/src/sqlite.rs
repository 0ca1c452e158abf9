//! SQLite-backed ledger and content store.
//!
//! Durable local journals with the same write-once contract as the in-memory
//! backends. Process-instance and message ids are stored as text: they span
//! the full u64 range, which SQLite integers do not.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use tessera_core::{
    AttrType, AuthorityId, CiphertextPointer, Commitment, ContentId, ContentStore, CoreError,
    CoreResult, ElementCommitments, Ledger, MessageId, ProcessInstanceId, ReaderGid,
    RegistryEntry, RevealedElements,
};

use crate::store::content_id_for;

fn storage_err(context: &str) -> impl FnOnce(rusqlite::Error) -> CoreError + '_ {
    move |e| CoreError::Storage(format!("{context}: {e}"))
}

fn decode32(s: &str, what: &str) -> CoreResult<[u8; 32]> {
    let bytes =
        hex::decode(s).map_err(|e| CoreError::Storage(format!("bad {what} hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::Storage(format!("{what} must be 32 bytes")))
}

/// Append-only ledger journal in a SQLite file.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path).map_err(storage_err("failed to open ledger"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS element_commitments (
                authority INTEGER NOT NULL,
                process TEXT NOT NULL,
                round INTEGER NOT NULL,
                first TEXT NOT NULL,
                second TEXT NOT NULL,
                PRIMARY KEY (authority, process, round)
            );
            CREATE TABLE IF NOT EXISTS revealed_elements (
                authority INTEGER NOT NULL,
                process TEXT NOT NULL,
                round INTEGER NOT NULL,
                first TEXT NOT NULL,
                second TEXT NOT NULL,
                PRIMARY KEY (authority, process, round)
            );
            CREATE TABLE IF NOT EXISTS parameter_pointers (
                authority INTEGER NOT NULL,
                process TEXT NOT NULL,
                pointer TEXT NOT NULL,
                PRIMARY KEY (authority, process)
            );
            CREATE TABLE IF NOT EXISTS authority_public_keys (
                authority INTEGER NOT NULL,
                process TEXT NOT NULL,
                key BLOB NOT NULL,
                PRIMARY KEY (authority, process)
            );
            CREATE TABLE IF NOT EXISTS reader_public_keys (
                reader TEXT PRIMARY KEY NOT NULL,
                key TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS registry_entries (
                process TEXT NOT NULL,
                reader TEXT NOT NULL,
                authority INTEGER NOT NULL,
                attr_type INTEGER NOT NULL,
                commitment TEXT NOT NULL,
                bundle TEXT NOT NULL,
                PRIMARY KEY (process, reader, authority, attr_type)
            );
            CREATE TABLE IF NOT EXISTS ciphertext_pointers (
                message_id TEXT PRIMARY KEY NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL
            );",
        )
        .map_err(storage_err("failed to create ledger tables"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> CoreResult<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Storage("ledger lock poisoned".into()))
    }

    fn publish_pair(
        &self,
        table: &str,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        first: &[u8; 32],
        second: &[u8; 32],
    ) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT first, second FROM {table} WHERE authority = ?1 AND process = ?2 AND round = ?3"
                ),
                params![authority_id.0, process_instance.to_string(), round],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("pair query failed"))?;
        let (first_hex, second_hex) = (hex::encode(first), hex::encode(second));
        match existing {
            Some((a, b)) if a == first_hex && b == second_hex => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "{table} for authority {authority_id} process {process_instance} round {round}"
            ))),
            None => {
                conn.execute(
                    &format!("INSERT INTO {table} VALUES (?1, ?2, ?3, ?4, ?5)"),
                    params![
                        authority_id.0,
                        process_instance.to_string(),
                        round,
                        first_hex,
                        second_hex
                    ],
                )
                .map_err(storage_err("pair insert failed"))?;
                Ok(())
            }
        }
    }

    fn read_pair(
        &self,
        table: &str,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<([u8; 32], [u8; 32])>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                &format!(
                    "SELECT first, second FROM {table} WHERE authority = ?1 AND process = ?2 AND round = ?3"
                ),
                params![authority_id.0, process_instance.to_string(), round],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("pair query failed"))?;
        match row {
            None => Ok(None),
            Some((a, b)) => Ok(Some((decode32(&a, table)?, decode32(&b, table)?))),
        }
    }
}

impl Ledger for SqliteLedger {
    fn publish_element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        commitments: &ElementCommitments,
    ) -> CoreResult<()> {
        self.publish_pair(
            "element_commitments",
            authority_id,
            process_instance,
            round,
            &commitments.first,
            &commitments.second,
        )
    }

    fn element_commitments(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<ElementCommitments>> {
        Ok(self
            .read_pair("element_commitments", authority_id, process_instance, round)?
            .map(|(first, second)| ElementCommitments { first, second }))
    }

    fn publish_revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
        elements: &RevealedElements,
    ) -> CoreResult<()> {
        self.publish_pair(
            "revealed_elements",
            authority_id,
            process_instance,
            round,
            &elements.first,
            &elements.second,
        )
    }

    fn revealed_elements(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> CoreResult<Option<RevealedElements>> {
        Ok(self
            .read_pair("revealed_elements", authority_id, process_instance, round)?
            .map(|(first, second)| RevealedElements { first, second }))
    }

    fn publish_parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        pointer: &ContentId,
    ) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT pointer FROM parameter_pointers WHERE authority = ?1 AND process = ?2",
                params![authority_id.0, process_instance.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("pointer query failed"))?;
        match existing {
            Some(p) if p == pointer.as_str() => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "parameters pointer for authority {authority_id} process {process_instance}"
            ))),
            None => {
                conn.execute(
                    "INSERT INTO parameter_pointers VALUES (?1, ?2, ?3)",
                    params![
                        authority_id.0,
                        process_instance.to_string(),
                        pointer.as_str()
                    ],
                )
                .map_err(storage_err("pointer insert failed"))?;
                Ok(())
            }
        }
    }

    fn parameters_pointer(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<ContentId>> {
        let conn = self.lock()?;
        let pointer: Option<String> = conn
            .query_row(
                "SELECT pointer FROM parameter_pointers WHERE authority = ?1 AND process = ?2",
                params![authority_id.0, process_instance.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("pointer query failed"))?;
        Ok(pointer.map(ContentId::new))
    }

    fn publish_authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
        key: &[u8],
    ) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT key FROM authority_public_keys WHERE authority = ?1 AND process = ?2",
                params![authority_id.0, process_instance.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("authority key query failed"))?;
        match existing {
            Some(k) if k == key => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "authority public key for {authority_id} process {process_instance}"
            ))),
            None => {
                conn.execute(
                    "INSERT INTO authority_public_keys VALUES (?1, ?2, ?3)",
                    params![authority_id.0, process_instance.to_string(), key],
                )
                .map_err(storage_err("authority key insert failed"))?;
                Ok(())
            }
        }
    }

    fn authority_public_key(
        &self,
        authority_id: AuthorityId,
        process_instance: ProcessInstanceId,
    ) -> CoreResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT key FROM authority_public_keys WHERE authority = ?1 AND process = ?2",
            params![authority_id.0, process_instance.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err("authority key query failed"))
    }

    fn publish_reader_public_key(&self, reader: &ReaderGid, key: &[u8; 32]) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT key FROM reader_public_keys WHERE reader = ?1",
                params![reader.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("reader key query failed"))?;
        let key_hex = hex::encode(key);
        match existing {
            Some(k) if k == key_hex => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "reader public key for {reader}"
            ))),
            None => {
                conn.execute(
                    "INSERT INTO reader_public_keys VALUES (?1, ?2)",
                    params![reader.as_str(), key_hex],
                )
                .map_err(storage_err("reader key insert failed"))?;
                Ok(())
            }
        }
    }

    fn reader_public_key(&self, reader: &ReaderGid) -> CoreResult<Option<[u8; 32]>> {
        let conn = self.lock()?;
        let key: Option<String> = conn
            .query_row(
                "SELECT key FROM reader_public_keys WHERE reader = ?1",
                params![reader.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("reader key query failed"))?;
        key.map(|k| decode32(&k, "reader public key")).transpose()
    }

    fn publish_registry_entry(&self, entry: &RegistryEntry) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT commitment, bundle FROM registry_entries
                 WHERE process = ?1 AND reader = ?2 AND authority = ?3 AND attr_type = ?4",
                params![
                    entry.process_instance.to_string(),
                    entry.reader.as_str(),
                    entry.authority_id.0,
                    entry.attr_type.code()
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("registry query failed"))?;
        match existing {
            Some((c, b)) if c == entry.commitment.to_hex() && b == entry.bundle.as_str() => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "registry entry for {} authority {} type {}",
                entry.reader, entry.authority_id, entry.attr_type
            ))),
            None => {
                conn.execute(
                    "INSERT INTO registry_entries VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.process_instance.to_string(),
                        entry.reader.as_str(),
                        entry.authority_id.0,
                        entry.attr_type.code(),
                        entry.commitment.to_hex(),
                        entry.bundle.as_str()
                    ],
                )
                .map_err(storage_err("registry insert failed"))?;
                Ok(())
            }
        }
    }

    fn registry_entry(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        authority_id: AuthorityId,
        attr_type: AttrType,
    ) -> CoreResult<Option<RegistryEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT commitment, bundle FROM registry_entries
                 WHERE process = ?1 AND reader = ?2 AND authority = ?3 AND attr_type = ?4",
                params![
                    process_instance.to_string(),
                    reader.as_str(),
                    authority_id.0,
                    attr_type.code()
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("registry query failed"))?;
        match row {
            None => Ok(None),
            Some((commitment, bundle)) => Ok(Some(RegistryEntry {
                process_instance,
                reader: reader.clone(),
                authority_id,
                attr_type,
                commitment: Commitment(decode32(&commitment, "commitment")?),
                bundle: ContentId::new(bundle),
            })),
        }
    }

    fn registry_entries_for_reader(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> CoreResult<Vec<RegistryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT authority, attr_type, commitment, bundle FROM registry_entries
                 WHERE process = ?1 AND reader = ?2 ORDER BY authority, attr_type",
            )
            .map_err(storage_err("registry prepare failed"))?;
        let rows = stmt
            .query_map(
                params![process_instance.to_string(), reader.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(storage_err("registry query failed"))?;
        let mut entries = Vec::new();
        for row in rows {
            let (authority, attr_code, commitment, bundle) =
                row.map_err(storage_err("registry row failed"))?;
            entries.push(RegistryEntry {
                process_instance,
                reader: reader.clone(),
                authority_id: AuthorityId(authority),
                attr_type: AttrType::from_code(attr_code)?,
                commitment: Commitment(decode32(&commitment, "commitment")?),
                bundle: ContentId::new(bundle),
            });
        }
        Ok(entries)
    }

    fn publish_ciphertext_pointer(&self, pointer: &CiphertextPointer) -> CoreResult<()> {
        let conn = self.lock()?;
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT content, sender FROM ciphertext_pointers WHERE message_id = ?1",
                params![pointer.message_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("pointer query failed"))?;
        match existing {
            Some((c, s)) if c == pointer.content.as_str() && s == pointer.sender.as_str() => Ok(()),
            Some(_) => Err(CoreError::AlreadyPublished(format!(
                "ciphertext pointer for message {}",
                pointer.message_id
            ))),
            None => {
                conn.execute(
                    "INSERT INTO ciphertext_pointers VALUES (?1, ?2, ?3)",
                    params![
                        pointer.message_id.to_string(),
                        pointer.content.as_str(),
                        pointer.sender.as_str()
                    ],
                )
                .map_err(storage_err("pointer insert failed"))?;
                Ok(())
            }
        }
    }

    fn ciphertext_pointer(&self, message_id: MessageId) -> CoreResult<Option<CiphertextPointer>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT content, sender FROM ciphertext_pointers WHERE message_id = ?1",
                params![message_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err("pointer query failed"))?;
        Ok(row.map(|(content, sender)| CiphertextPointer {
            message_id,
            content: ContentId::new(content),
            sender: ReaderGid::new(sender),
        }))
    }
}

/// Content-addressed store in a SQLite file.
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
}

impl SqliteContentStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path).map_err(storage_err("failed to open content store"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                content_id TEXT PRIMARY KEY NOT NULL,
                bytes BLOB NOT NULL
            );",
        )
        .map_err(storage_err("failed to create blob table"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> CoreResult<Self> {
        Self::open(":memory:")
    }
}

impl ContentStore for SqliteContentStore {
    fn put(&self, bytes: &[u8]) -> CoreResult<ContentId> {
        let id = content_id_for(bytes);
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::ContentStore("store lock poisoned".into()))?;
        conn.execute(
            "INSERT OR IGNORE INTO blobs VALUES (?1, ?2)",
            params![id.as_str(), bytes],
        )
        .map_err(|e| CoreError::ContentStore(format!("blob insert failed: {e}")))?;
        Ok(id)
    }

    fn get(&self, id: &ContentId) -> CoreResult<Option<Vec<u8>>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CoreError::ContentStore("store lock poisoned".into()))?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT bytes FROM blobs WHERE content_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::ContentStore(format!("blob query failed: {e}")))?;
        match bytes {
            None => Ok(None),
            Some(bytes) => {
                if content_id_for(&bytes) != *id {
                    return Err(CoreError::ContentDigestMismatch(id.to_string()));
                }
                Ok(Some(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_pair_roundtrip() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let (a, p) = (AuthorityId(1), ProcessInstanceId(17_000_000_000_000_000_001));
        let pair = ElementCommitments {
            first: [0xaa; 32],
            second: [0xbb; 32],
        };
        ledger.publish_element_commitments(a, p, 0, &pair).unwrap();
        assert_eq!(ledger.element_commitments(a, p, 0).unwrap(), Some(pair));
        assert!(ledger.element_commitments(a, p, 1).unwrap().is_none());
    }

    #[test]
    fn test_ledger_conflict_rejected() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let (a, p) = (AuthorityId(1), ProcessInstanceId(7));
        ledger
            .publish_parameters_pointer(a, p, &ContentId::new("one"))
            .unwrap();
        ledger
            .publish_parameters_pointer(a, p, &ContentId::new("one"))
            .unwrap();
        assert!(matches!(
            ledger.publish_parameters_pointer(a, p, &ContentId::new("two")),
            Err(CoreError::AlreadyPublished(_))
        ));
    }

    #[test]
    fn test_registry_roundtrip() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let entry = RegistryEntry {
            process_instance: ProcessInstanceId(5),
            reader: ReaderGid::new("r1"),
            authority_id: AuthorityId(2),
            attr_type: AttrType::Department,
            commitment: Commitment([0x11; 32]),
            bundle: ContentId::new("bundle"),
        };
        ledger.publish_registry_entry(&entry).unwrap();
        let read = ledger
            .registry_entry(
                ProcessInstanceId(5),
                &ReaderGid::new("r1"),
                AuthorityId(2),
                AttrType::Department,
            )
            .unwrap();
        assert_eq!(read, Some(entry.clone()));
        let all = ledger
            .registry_entries_for_reader(ProcessInstanceId(5), &ReaderGid::new("r1"))
            .unwrap();
        assert_eq!(all, vec![entry]);
    }

    #[test]
    fn test_reader_key_directory() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let reader = ReaderGid::new("r1");
        ledger.publish_reader_public_key(&reader, &[0x42; 32]).unwrap();
        assert_eq!(ledger.reader_public_key(&reader).unwrap(), Some([0x42; 32]));
        assert!(matches!(
            ledger.publish_reader_public_key(&reader, &[0x43; 32]),
            Err(CoreError::AlreadyPublished(_))
        ));
    }

    #[test]
    fn test_ciphertext_pointer_roundtrip() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let pointer = CiphertextPointer {
            message_id: MessageId(99),
            content: ContentId::new("cid"),
            sender: ReaderGid::new("owner"),
        };
        ledger.publish_ciphertext_pointer(&pointer).unwrap();
        assert_eq!(
            ledger.ciphertext_pointer(MessageId(99)).unwrap(),
            Some(pointer)
        );
    }

    #[test]
    fn test_content_store_roundtrip() {
        let store = SqliteContentStore::in_memory().unwrap();
        let id = store.put(b"payload").unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(b"payload".to_vec()));
        assert!(store.get(&ContentId::new("absent")).unwrap().is_none());
    }
}
