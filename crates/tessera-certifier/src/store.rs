//! The certifier's private store.
//!
//! Holds the full attribute tuples — secrets included — keyed by
//! (process, reader, authority, attribute type). Insert-once: a cell is
//! certified at most one time.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use tessera_core::{
    AttrType, AttributeSecret, AttributeTuple, AuthorityId, Commitment, ExpiryDate,
    ProcessInstanceId, ReaderGid,
};

use crate::error::{CertifierError, CertifierResult};

pub struct CertifierStore {
    conn: Mutex<Connection>,
}

impl CertifierStore {
    pub fn open(path: &str) -> CertifierResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CertifierError::Storage(format!("failed to open store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS certified_attributes (
                process TEXT NOT NULL,
                reader TEXT NOT NULL,
                authority INTEGER NOT NULL,
                attr_type INTEGER NOT NULL,
                commitment TEXT NOT NULL,
                secret TEXT NOT NULL,
                value TEXT NOT NULL,
                expiry INTEGER NOT NULL,
                PRIMARY KEY (process, reader, authority, attr_type)
            );",
        )
        .map_err(|e| CertifierError::Storage(format!("failed to create tables: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> CertifierResult<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> CertifierResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CertifierError::Storage("store lock poisoned".into()))
    }

    pub fn insert(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
        tuple: &AttributeTuple,
        commitment: &Commitment,
    ) -> CertifierResult<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT commitment FROM certified_attributes
                 WHERE process = ?1 AND reader = ?2 AND authority = ?3 AND attr_type = ?4",
                params![
                    process_instance.to_string(),
                    reader.as_str(),
                    tuple.authority_id.0,
                    tuple.attr_type.code()
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CertifierError::Storage(format!("query failed: {e}")))?;
        if existing.is_some() {
            return Err(CertifierError::AlreadyCertified(format!(
                "{reader} with authority {} type {}",
                tuple.authority_id, tuple.attr_type
            )));
        }
        conn.execute(
            "INSERT INTO certified_attributes VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                process_instance.to_string(),
                reader.as_str(),
                tuple.authority_id.0,
                tuple.attr_type.code(),
                commitment.to_hex(),
                hex::encode(tuple.secret.as_bytes()),
                tuple.value,
                tuple.expiry.0
            ],
        )
        .map_err(|e| CertifierError::Storage(format!("insert failed: {e}")))?;
        Ok(())
    }

    /// The tuples certified for one reader — what the trusted channel
    /// ultimately delivers.
    pub fn tuples_for(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> CertifierResult<Vec<AttributeTuple>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT authority, attr_type, secret, value, expiry FROM certified_attributes
                 WHERE process = ?1 AND reader = ?2 ORDER BY authority, attr_type",
            )
            .map_err(|e| CertifierError::Storage(format!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![process_instance.to_string(), reader.as_str()], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .map_err(|e| CertifierError::Storage(format!("query failed: {e}")))?;

        let mut tuples = Vec::new();
        for row in rows {
            let (authority, attr_code, secret_hex, value, expiry) =
                row.map_err(|e| CertifierError::Storage(format!("row failed: {e}")))?;
            let secret_bytes: [u8; 32] = hex::decode(&secret_hex)
                .map_err(|e| CertifierError::Storage(format!("bad secret hex: {e}")))?
                .try_into()
                .map_err(|_| CertifierError::Storage("secret must be 32 bytes".into()))?;
            tuples.push(AttributeTuple {
                secret: AttributeSecret::from_bytes(secret_bytes),
                value,
                authority_id: AuthorityId(authority),
                attr_type: AttrType::from_code(attr_code)?,
                expiry: ExpiryDate(expiry),
            });
        }
        Ok(tuples)
    }
}
