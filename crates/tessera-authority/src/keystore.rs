//! The authority's private store.
//!
//! Holds the per-process key share. Per-key uniqueness makes record access
//! safe across connection handlers without extra locking beyond the
//! connection's own guard.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use tessera_core::{AuthorityId, ProcessInstanceId};
use tessera_policy::AuthorityKeyShare;

use crate::error::{AuthorityError, AuthorityResult};

pub struct AuthorityStore {
    authority_id: AuthorityId,
    conn: Mutex<Connection>,
}

impl AuthorityStore {
    pub fn open(authority_id: AuthorityId, path: &str) -> AuthorityResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| AuthorityError::Storage(format!("failed to open store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS key_shares (
                process TEXT PRIMARY KEY NOT NULL,
                share TEXT NOT NULL
            );",
        )
        .map_err(|e| AuthorityError::Storage(format!("failed to create tables: {e}")))?;
        Ok(Self {
            authority_id,
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory(authority_id: AuthorityId) -> AuthorityResult<Self> {
        Self::open(authority_id, ":memory:")
    }

    pub fn authority_id(&self) -> AuthorityId {
        self.authority_id
    }

    fn lock(&self) -> AuthorityResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AuthorityError::Storage("store lock poisoned".into()))
    }

    pub fn key_share(
        &self,
        process_instance: ProcessInstanceId,
    ) -> AuthorityResult<Option<AuthorityKeyShare>> {
        let conn = self.lock()?;
        let share_hex: Option<String> = conn
            .query_row(
                "SELECT share FROM key_shares WHERE process = ?1",
                params![process_instance.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AuthorityError::Storage(format!("share query failed: {e}")))?;
        match share_hex {
            None => Ok(None),
            Some(hex_str) => {
                let bytes: [u8; 32] = hex::decode(&hex_str)
                    .map_err(|e| AuthorityError::Storage(format!("bad share hex: {e}")))?
                    .try_into()
                    .map_err(|_| AuthorityError::Storage("share must be 32 bytes".into()))?;
                Ok(Some(AuthorityKeyShare::from_bytes(
                    self.authority_id,
                    process_instance,
                    bytes,
                )))
            }
        }
    }

    /// Store a freshly generated share. A share, once written, is never
    /// replaced; published attribute keys derive from it.
    pub fn insert_key_share(&self, share: &AuthorityKeyShare) -> AuthorityResult<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT share FROM key_shares WHERE process = ?1",
                params![share.process_instance.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AuthorityError::Storage(format!("share query failed: {e}")))?;
        if existing.is_some() {
            return Err(AuthorityError::Storage(format!(
                "key share already exists for process {}",
                share.process_instance
            )));
        }
        conn.execute(
            "INSERT INTO key_shares VALUES (?1, ?2)",
            params![
                share.process_instance.to_string(),
                hex::encode(share.share_bytes())
            ],
        )
        .map_err(|e| AuthorityError::Storage(format!("share insert failed: {e}")))?;
        Ok(())
    }
}

/// Load or create the authority's key share for one process instance,
/// publishing the derived attribute public key on first creation.
pub fn provision_key_share<R: rand::RngCore>(
    store: &AuthorityStore,
    ledger: &dyn tessera_core::Ledger,
    params: &tessera_policy::PublicParameters,
    rng: &mut R,
) -> AuthorityResult<AuthorityKeyShare> {
    let process_instance = params.process_instance;
    if let Some(share) = store.key_share(process_instance)? {
        return Ok(share);
    }
    let share = AuthorityKeyShare::generate(store.authority_id(), process_instance, rng);
    store.insert_key_share(&share)?;
    let public = share.attribute_public_key(params)?;
    ledger.publish_authority_public_key(store.authority_id(), process_instance, &public.key)?;
    tracing::info!(
        authority = %store.authority_id(),
        process = %process_instance,
        "key share provisioned, attribute public key published"
    );
    Ok(share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_share_roundtrip() {
        let store = AuthorityStore::in_memory(AuthorityId(1)).unwrap();
        let share = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(7), &mut OsRng);
        store.insert_key_share(&share).unwrap();
        let loaded = store.key_share(ProcessInstanceId(7)).unwrap().unwrap();
        assert_eq!(loaded.share_bytes(), share.share_bytes());
    }

    #[test]
    fn test_share_absent() {
        let store = AuthorityStore::in_memory(AuthorityId(1)).unwrap();
        assert!(store.key_share(ProcessInstanceId(7)).unwrap().is_none());
    }

    #[test]
    fn test_share_write_once() {
        let store = AuthorityStore::in_memory(AuthorityId(1)).unwrap();
        let share = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(7), &mut OsRng);
        store.insert_key_share(&share).unwrap();
        let other = AuthorityKeyShare::generate(AuthorityId(1), ProcessInstanceId(7), &mut OsRng);
        assert!(store.insert_key_share(&other).is_err());
    }

    #[test]
    fn test_provision_is_idempotent_and_publishes_once() {
        use tessera_core::Ledger;
        use tessera_ledger::InMemoryLedger;
        use tessera_policy::{ParamElement, PublicParameters};

        let store = AuthorityStore::in_memory(AuthorityId(1)).unwrap();
        let ledger = InMemoryLedger::new();
        let params = PublicParameters::derive(
            ProcessInstanceId(7),
            &[ParamElement::random(&mut OsRng)],
            &[ParamElement::random(&mut OsRng)],
        );

        let first = provision_key_share(&store, &ledger, &params, &mut OsRng).unwrap();
        let second = provision_key_share(&store, &ledger, &params, &mut OsRng).unwrap();
        assert_eq!(first.share_bytes(), second.share_bytes());

        let published = ledger
            .authority_public_key(AuthorityId(1), ProcessInstanceId(7))
            .unwrap()
            .unwrap();
        assert_eq!(
            published,
            first.attribute_public_key(&params).unwrap().key.to_vec()
        );
    }
}
