//! Single-use handshake nonces.
//!
//! One pending nonce per (process instance, reader). `take` removes the
//! nonce, so a nonce is consumed by the verification attempt that follows —
//! whether that verification succeeds or fails.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;

use tessera_core::{ProcessInstanceId, ReaderGid};

#[derive(Default)]
pub struct NonceRegistry {
    pending: Mutex<HashMap<(ProcessInstanceId, ReaderGid), u64>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh nonce, replacing any pending one for the same reader.
    pub fn issue(&self, process_instance: ProcessInstanceId, reader: &ReaderGid) -> u64 {
        let nonce: u64 = rand::rngs::OsRng.gen_range(1..=u64::MAX);
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if pending
            .insert((process_instance, reader.clone()), nonce)
            .is_some()
        {
            tracing::debug!(reader = %reader, "replaced pending handshake nonce");
        }
        nonce
    }

    /// Consume the pending nonce, if any.
    pub fn take(&self, process_instance: ProcessInstanceId, reader: &ReaderGid) -> Option<u64> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.remove(&(process_instance, reader.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_take() {
        let registry = NonceRegistry::new();
        let reader = ReaderGid::new("r1");
        let nonce = registry.issue(ProcessInstanceId(1), &reader);
        assert_eq!(registry.take(ProcessInstanceId(1), &reader), Some(nonce));
    }

    #[test]
    fn test_nonce_is_single_use() {
        let registry = NonceRegistry::new();
        let reader = ReaderGid::new("r1");
        registry.issue(ProcessInstanceId(1), &reader);
        registry.take(ProcessInstanceId(1), &reader);
        assert_eq!(registry.take(ProcessInstanceId(1), &reader), None);
    }

    #[test]
    fn test_reissue_replaces() {
        let registry = NonceRegistry::new();
        let reader = ReaderGid::new("r1");
        let first = registry.issue(ProcessInstanceId(1), &reader);
        let second = registry.issue(ProcessInstanceId(1), &reader);
        assert_ne!(first, second);
        assert_eq!(registry.take(ProcessInstanceId(1), &reader), Some(second));
    }

    #[test]
    fn test_scoped_by_process_and_reader() {
        let registry = NonceRegistry::new();
        let reader = ReaderGid::new("r1");
        registry.issue(ProcessInstanceId(1), &reader);
        assert_eq!(registry.take(ProcessInstanceId(2), &reader), None);
        assert_eq!(
            registry.take(ProcessInstanceId(1), &ReaderGid::new("r2")),
            None
        );
    }
}
