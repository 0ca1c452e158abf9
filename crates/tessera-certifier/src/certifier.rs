//! Certification workflow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_core::{
    AttributeLabel, AttributeSecret, AttributeTuple, CommitmentCodec, ContentStore, ExpiryDate,
    Ledger, MetricsCollector, ProcessInstanceId, ReaderGid, RegistryEntry,
};

use crate::bundle::AttributeBundle;
use crate::error::{CertifierError, CertifierResult};
use crate::store::CertifierStore;

// ---------------------------------------------------------------------------
// RoleAssignments — the certifier's input document
// ---------------------------------------------------------------------------

/// Reader-to-labels assignment, the parsed form of a roles file:
/// `{"reader-gid": ["MANUFACTURER@A1", "CUSTOMS@A2"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignments(pub BTreeMap<ReaderGid, Vec<AttributeLabel>>);

impl RoleAssignments {
    pub fn from_json(bytes: &[u8]) -> CertifierResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CertifierError::InvalidAssignment(e.to_string()))
    }
}

/// What one certification run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificationSummary {
    pub process_instance: ProcessInstanceId,
    pub readers: usize,
    pub attributes: usize,
    pub bundle: tessera_core::ContentId,
}

// ---------------------------------------------------------------------------
// Certifier
// ---------------------------------------------------------------------------

pub struct Certifier {
    store: CertifierStore,
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
}

impl Certifier {
    pub fn new(store: CertifierStore, ledger: Arc<dyn Ledger>, content: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            ledger,
            content,
        }
    }

    /// Certify every assignment for one process instance.
    ///
    /// Secrets are sampled fresh per (reader, attribute) and never leave the
    /// private store; only commitments and the label bundle are published.
    pub fn certify<R: rand::RngCore + rand::CryptoRng>(
        &self,
        process_instance: ProcessInstanceId,
        assignments: &RoleAssignments,
        rng: &mut R,
        metrics: &MetricsCollector,
    ) -> CertifierResult<CertificationSummary> {
        let phase = metrics.start_phase("certify");

        if assignments.0.is_empty() {
            return Err(CertifierError::InvalidAssignment(
                "no readers to certify".into(),
            ));
        }
        for (reader, labels) in &assignments.0 {
            let mut cells = std::collections::BTreeSet::new();
            for label in labels {
                if !cells.insert((label.authority_id, label.attr_type())) {
                    return Err(CertifierError::InvalidAssignment(format!(
                        "{reader} has two attributes in the same (authority, type) cell: {label}"
                    )));
                }
            }
        }

        let bundle = AttributeBundle {
            process_instance,
            readers: assignments.0.clone(),
        };
        let bundle_id = self.content.put(&bundle.to_bytes()?)?;

        let mut attributes = 0;
        for (reader, labels) in &assignments.0 {
            for label in labels {
                let tuple = AttributeTuple {
                    secret: AttributeSecret::generate(rng),
                    value: label.value.clone(),
                    authority_id: label.authority_id,
                    attr_type: label.attr_type(),
                    expiry: ExpiryDate::one_period_from_now(),
                };
                let commitment = CommitmentCodec::commit(&tuple);
                self.store.insert(process_instance, reader, &tuple, &commitment)?;
                self.ledger.publish_registry_entry(&RegistryEntry {
                    process_instance,
                    reader: reader.clone(),
                    authority_id: tuple.authority_id,
                    attr_type: tuple.attr_type,
                    commitment,
                    bundle: bundle_id.clone(),
                })?;
                attributes += 1;
            }
            tracing::info!(
                reader = %reader,
                labels = labels.len(),
                process_instance = %process_instance,
                "reader certified"
            );
        }

        metrics.finish(phase);
        Ok(CertificationSummary {
            process_instance,
            readers: assignments.0.len(),
            attributes,
            bundle: bundle_id,
        })
    }

    /// Hand a reader its certified tuples. Stands in for the trusted
    /// delivery channel; nothing here touches the ledger.
    pub fn issued_tuples(
        &self,
        process_instance: ProcessInstanceId,
        reader: &ReaderGid,
    ) -> CertifierResult<Vec<AttributeTuple>> {
        let tuples = self.store.tuples_for(process_instance, reader)?;
        if tuples.is_empty() {
            return Err(CertifierError::NotCertified(reader.to_string()));
        }
        Ok(tuples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use tessera_core::{AttrType, AuthorityId};
    use tessera_ledger::{InMemoryContentStore, InMemoryLedger};

    fn assignments(json: &str) -> RoleAssignments {
        RoleAssignments::from_json(json.as_bytes()).unwrap()
    }

    fn certifier() -> (Certifier, Arc<InMemoryLedger>, Arc<InMemoryContentStore>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let content = Arc::new(InMemoryContentStore::new());
        let certifier = Certifier::new(
            CertifierStore::in_memory().unwrap(),
            ledger.clone(),
            content.clone(),
        );
        (certifier, ledger, content)
    }

    #[test]
    fn test_certify_publishes_commitments_not_secrets() {
        let (certifier, ledger, content) = certifier();
        let process = ProcessInstanceId(42);
        let summary = certifier
            .certify(
                process,
                &assignments(r#"{"r1": ["MANUFACTURER@A1", "CUSTOMS@A2"]}"#),
                &mut OsRng,
                &MetricsCollector::new(),
            )
            .unwrap();
        assert_eq!(summary.readers, 1);
        assert_eq!(summary.attributes, 2);

        let entries = ledger
            .registry_entries_for_reader(process, &ReaderGid::new("r1"))
            .unwrap();
        assert_eq!(entries.len(), 2);

        // The published bundle carries labels only
        let bundle_bytes = content.get(&summary.bundle).unwrap().unwrap();
        let bundle = AttributeBundle::from_bytes(&bundle_bytes).unwrap();
        assert_eq!(
            bundle.labels_for(&ReaderGid::new("r1"), AuthorityId(1)),
            vec!["MANUFACTURER@A1".parse().unwrap()]
        );

        // The commitment matches what the issued tuple recommits to
        let tuples = certifier
            .issued_tuples(process, &ReaderGid::new("r1"))
            .unwrap();
        let manufacturer = tuples
            .iter()
            .find(|t| t.value == "MANUFACTURER")
            .unwrap();
        let entry = ledger
            .registry_entry(process, &ReaderGid::new("r1"), AuthorityId(1), AttrType::Other)
            .unwrap()
            .unwrap();
        assert_eq!(CommitmentCodec::commit(manufacturer), entry.commitment);
    }

    #[test]
    fn test_issued_tuples_unknown_reader() {
        let (certifier, _, _) = certifier();
        let err = certifier
            .issued_tuples(ProcessInstanceId(1), &ReaderGid::new("ghost"))
            .unwrap_err();
        assert!(matches!(err, CertifierError::NotCertified(_)));
    }

    #[test]
    fn test_duplicate_cell_rejected() {
        let (certifier, _, _) = certifier();
        // Two Other-typed labels with the same authority collide in the
        // registry's (authority, type) cell
        let err = certifier
            .certify(
                ProcessInstanceId(1),
                &assignments(r#"{"r1": ["MANUFACTURER@A1", "LOGISTIC@A1"]}"#),
                &mut OsRng,
                &MetricsCollector::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CertifierError::InvalidAssignment(_)));
    }

    #[test]
    fn test_distinct_types_share_an_authority() {
        let (certifier, _, _) = certifier();
        let summary = certifier
            .certify(
                ProcessInstanceId(1),
                &assignments(r#"{"r1": ["MANUFACTURER@A1", "SALES_ROLE@A1"]}"#),
                &mut OsRng,
                &MetricsCollector::new(),
            )
            .unwrap();
        assert_eq!(summary.attributes, 2);
    }

    #[test]
    fn test_empty_assignments_rejected() {
        let (certifier, _, _) = certifier();
        let err = certifier
            .certify(
                ProcessInstanceId(1),
                &assignments("{}"),
                &mut OsRng,
                &MetricsCollector::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CertifierError::InvalidAssignment(_)));
    }
}
