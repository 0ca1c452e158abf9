//! Distributed parameter agreement via commit-reveal.
//!
//! Each authority samples two random parameter elements, publishes their
//! commitments, then the elements themselves, and waits for every other
//! authority to do the same. Once all reveals are present it recomputes
//! every commitment from the revealed elements — a mismatch aborts the
//! round — and combines the elements into the public parameters. All
//! authorities reading the same ledger state derive byte-identical bytes.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::{
    AuthorityId, ContentId, ContentStore, ElementCommitments, Ledger, MetricsCollector,
    ProcessInstanceId, RevealedElements,
};
use tessera_policy::{ParamElement, PublicParameters};

use crate::error::{AuthorityError, AuthorityResult};

/// Lifecycle of one authority's view of one agreement round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    Committed,
    Revealed,
    Aggregated,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Sleep between ledger polls while waiting for the other authorities.
    /// The wait itself is unbounded; cancellation is external.
    pub poll_interval: Duration,
    /// How many commit-reveal rounds to attempt before giving up. A round
    /// only restarts after a commitment mismatch.
    pub max_rounds: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_rounds: 3,
        }
    }
}

pub struct AuthorityCoordinator {
    authority_id: AuthorityId,
    authorities: Vec<AuthorityId>,
    ledger: Arc<dyn Ledger>,
    content: Arc<dyn ContentStore>,
    config: CoordinatorConfig,
}

impl AuthorityCoordinator {
    pub fn new(
        authority_id: AuthorityId,
        authorities: Vec<AuthorityId>,
        ledger: Arc<dyn Ledger>,
        content: Arc<dyn ContentStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            authority_id,
            authorities,
            ledger,
            content,
            config,
        }
    }

    /// Run parameter agreement, retrying from the commit phase after a
    /// commitment mismatch, up to the configured round cap.
    pub fn run<R: rand::RngCore + rand::CryptoRng>(
        &self,
        process_instance: ProcessInstanceId,
        rng: &mut R,
        metrics: &MetricsCollector,
    ) -> AuthorityResult<PublicParameters> {
        for round in 0..self.config.max_rounds {
            match self.run_round(process_instance, round, rng, metrics) {
                Ok(params) => return Ok(params),
                Err(AuthorityError::CommitmentMismatch { authority, round }) => {
                    tracing::warn!(
                        %authority,
                        round,
                        "commitment mismatch, restarting from the commit phase"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(AuthorityError::AgreementFailed(format!(
            "no agreement after {} rounds",
            self.config.max_rounds
        )))
    }

    /// One commit-reveal round.
    pub fn run_round<R: rand::RngCore + rand::CryptoRng>(
        &self,
        process_instance: ProcessInstanceId,
        round: u32,
        rng: &mut R,
        metrics: &MetricsCollector,
    ) -> AuthorityResult<PublicParameters> {
        let phase_handle = metrics.start_phase(format!("parameter-agreement round {round}"));

        // Commit phase
        let first = ParamElement::random(rng);
        let second = ParamElement::random(rng);
        self.ledger.publish_element_commitments(
            self.authority_id,
            process_instance,
            round,
            &ElementCommitments {
                first: first.commitment(),
                second: second.commitment(),
            },
        )?;
        let mut phase = SetupPhase::Committed;
        tracing::info!(authority = %self.authority_id, round, ?phase, "elements committed");

        // Reveal phase
        self.ledger.publish_revealed_elements(
            self.authority_id,
            process_instance,
            round,
            &RevealedElements {
                first: first.to_bytes(),
                second: second.to_bytes(),
            },
        )?;
        phase = SetupPhase::Revealed;
        tracing::info!(authority = %self.authority_id, round, ?phase, "elements revealed");

        // Wait for every authority's pair, polling at a fixed interval.
        let collected = self.await_all(process_instance, round)?;

        // Binding check: every revealed element must hash to its prior
        // commitment. A mismatch is fatal to the round.
        let mut firsts = Vec::with_capacity(collected.len());
        let mut seconds = Vec::with_capacity(collected.len());
        for (authority, commitments, revealed) in &collected {
            let first = ParamElement::from_bytes(&revealed.first).map_err(|_| {
                AuthorityError::CommitmentMismatch {
                    authority: *authority,
                    round,
                }
            })?;
            let second = ParamElement::from_bytes(&revealed.second).map_err(|_| {
                AuthorityError::CommitmentMismatch {
                    authority: *authority,
                    round,
                }
            })?;
            if first.commitment() != commitments.first
                || second.commitment() != commitments.second
            {
                return Err(AuthorityError::CommitmentMismatch {
                    authority: *authority,
                    round,
                });
            }
            firsts.push(first);
            seconds.push(second);
        }

        // Aggregate with the group law and publish the pointer.
        let params = PublicParameters::derive(process_instance, &firsts, &seconds);
        let pointer = self.store_parameters(&params)?;
        self.ledger
            .publish_parameters_pointer(self.authority_id, process_instance, &pointer)?;
        phase = SetupPhase::Aggregated;
        tracing::info!(
            authority = %self.authority_id,
            round,
            ?phase,
            pointer = %pointer,
            "public parameters derived"
        );

        metrics.finish(phase_handle);
        Ok(params)
    }

    /// Block until every authority's commitments and reveals are on the
    /// ledger. The retry counter is unbounded by design; each miss sleeps
    /// the configured interval.
    fn await_all(
        &self,
        process_instance: ProcessInstanceId,
        round: u32,
    ) -> AuthorityResult<Vec<(AuthorityId, ElementCommitments, RevealedElements)>> {
        let mut retries: u64 = 0;
        loop {
            let mut collected = Vec::with_capacity(self.authorities.len());
            let mut missing = None;
            for &authority in &self.authorities {
                let commitments =
                    self.ledger
                        .element_commitments(authority, process_instance, round)?;
                let revealed = self
                    .ledger
                    .revealed_elements(authority, process_instance, round)?;
                match (commitments, revealed) {
                    (Some(c), Some(r)) => collected.push((authority, c, r)),
                    _ => {
                        missing = Some(authority);
                        break;
                    }
                }
            }
            match missing {
                None => return Ok(collected),
                Some(authority) => {
                    retries += 1;
                    tracing::debug!(
                        waiting_on = %authority,
                        retries,
                        round,
                        "ledger incomplete, polling again"
                    );
                    std::thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    fn store_parameters(&self, params: &PublicParameters) -> AuthorityResult<ContentId> {
        let bytes = params.to_canonical_bytes()?;
        Ok(self.content.put(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use tessera_ledger::{InMemoryContentStore, InMemoryLedger};

    fn coordinator(
        authority: u32,
        ledger: &Arc<InMemoryLedger>,
        content: &Arc<InMemoryContentStore>,
    ) -> AuthorityCoordinator {
        AuthorityCoordinator::new(
            AuthorityId(authority),
            vec![AuthorityId(1), AuthorityId(2)],
            ledger.clone() as Arc<dyn Ledger>,
            content.clone() as Arc<dyn ContentStore>,
            CoordinatorConfig {
                poll_interval: Duration::from_millis(1),
                max_rounds: 2,
            },
        )
    }

    #[test]
    fn test_two_authorities_agree() {
        let ledger = Arc::new(InMemoryLedger::new());
        let content = Arc::new(InMemoryContentStore::new());
        let process = ProcessInstanceId(42);
        let metrics = MetricsCollector::new();

        // Authority 2's pair is published up front so authority 1 finds a
        // complete ledger without waiting.
        let a1 = coordinator(1, &ledger, &content);

        let first = ParamElement::random(&mut OsRng);
        let second = ParamElement::random(&mut OsRng);
        ledger
            .publish_element_commitments(
                AuthorityId(2),
                process,
                0,
                &ElementCommitments {
                    first: first.commitment(),
                    second: second.commitment(),
                },
            )
            .unwrap();
        ledger
            .publish_revealed_elements(
                AuthorityId(2),
                process,
                0,
                &RevealedElements {
                    first: first.to_bytes(),
                    second: second.to_bytes(),
                },
            )
            .unwrap();

        let params = a1.run_round(process, 0, &mut OsRng, &metrics).unwrap();

        // Re-deriving from the same ledger state is byte-identical.
        let mut firsts = Vec::new();
        let mut seconds = Vec::new();
        for authority in [AuthorityId(1), AuthorityId(2)] {
            let revealed = ledger.revealed_elements(authority, process, 0).unwrap().unwrap();
            firsts.push(ParamElement::from_bytes(&revealed.first).unwrap());
            seconds.push(ParamElement::from_bytes(&revealed.second).unwrap());
        }
        let rederived = PublicParameters::derive(process, &firsts, &seconds);
        assert_eq!(
            params.to_canonical_bytes().unwrap(),
            rederived.to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn test_commitment_mismatch_aborts_round() {
        let ledger = Arc::new(InMemoryLedger::new());
        let content = Arc::new(InMemoryContentStore::new());
        let process = ProcessInstanceId(42);
        let metrics = MetricsCollector::new();

        // Authority 2 publishes a reveal that does not match its commitment.
        let honest = ParamElement::random(&mut OsRng);
        let dishonest = ParamElement::random(&mut OsRng);
        ledger
            .publish_element_commitments(
                AuthorityId(2),
                process,
                0,
                &ElementCommitments {
                    first: honest.commitment(),
                    second: honest.commitment(),
                },
            )
            .unwrap();
        ledger
            .publish_revealed_elements(
                AuthorityId(2),
                process,
                0,
                &RevealedElements {
                    first: dishonest.to_bytes(),
                    second: dishonest.to_bytes(),
                },
            )
            .unwrap();

        let a1 = coordinator(1, &ledger, &content);
        let err = a1.run_round(process, 0, &mut OsRng, &metrics).unwrap_err();
        assert!(matches!(
            err,
            AuthorityError::CommitmentMismatch {
                authority: AuthorityId(2),
                round: 0
            }
        ));
        // No parameters were published for the failed round
        assert!(ledger
            .parameters_pointer(AuthorityId(1), process)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_garbage_reveal_is_a_mismatch() {
        let ledger = Arc::new(InMemoryLedger::new());
        let content = Arc::new(InMemoryContentStore::new());
        let process = ProcessInstanceId(42);
        let metrics = MetricsCollector::new();

        let honest = ParamElement::random(&mut OsRng);
        ledger
            .publish_element_commitments(
                AuthorityId(2),
                process,
                0,
                &ElementCommitments {
                    first: honest.commitment(),
                    second: honest.commitment(),
                },
            )
            .unwrap();
        // 0xFF.. is not a canonical group element encoding
        ledger
            .publish_revealed_elements(
                AuthorityId(2),
                process,
                0,
                &RevealedElements {
                    first: [0xff; 32],
                    second: [0xff; 32],
                },
            )
            .unwrap();

        let a1 = coordinator(1, &ledger, &content);
        let err = a1.run_round(process, 0, &mut OsRng, &metrics).unwrap_err();
        assert!(matches!(err, AuthorityError::CommitmentMismatch { .. }));
    }
}
