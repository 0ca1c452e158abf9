//! The discovery bundle published to the content store.
//!
//! Maps each certified reader to its attribute labels for one process
//! instance. Servers use it to resolve a reader's labels on the
//! handshake path; it carries no secrets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tessera_core::{AttributeLabel, AuthorityId, ProcessInstanceId, ReaderGid};

use crate::error::{CertifierError, CertifierResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBundle {
    pub process_instance: ProcessInstanceId,
    pub readers: BTreeMap<ReaderGid, Vec<AttributeLabel>>,
}

impl AttributeBundle {
    pub fn to_bytes(&self) -> CertifierResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CertifierError::Storage(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> CertifierResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CertifierError::Storage(e.to_string()))
    }

    /// Labels one reader holds with one authority.
    pub fn labels_for(&self, reader: &ReaderGid, authority_id: AuthorityId) -> Vec<AttributeLabel> {
        self.readers
            .get(reader)
            .map(|labels| {
                labels
                    .iter()
                    .filter(|l| l.authority_id == authority_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_roundtrip_and_filter() {
        let mut readers = BTreeMap::new();
        readers.insert(
            ReaderGid::new("r1"),
            vec![
                "MANUFACTURER@A1".parse().unwrap(),
                "CUSTOMS@A2".parse().unwrap(),
            ],
        );
        let bundle = AttributeBundle {
            process_instance: ProcessInstanceId(5),
            readers,
        };
        let back = AttributeBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();
        assert_eq!(back, bundle);

        let labels = bundle.labels_for(&ReaderGid::new("r1"), AuthorityId(1));
        assert_eq!(labels, vec!["MANUFACTURER@A1".parse().unwrap()]);
        assert!(bundle
            .labels_for(&ReaderGid::new("nobody"), AuthorityId(1))
            .is_empty());
    }
}
