use thiserror::Error;

use tessera_core::{AuthorityId, CurrentDate, ProcessInstanceId};

/// Faults of the authority-side machinery.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// A revealed element does not hash to its prior commitment. Fatal to
    /// the agreement round; the round restarts from the commit phase.
    #[error("commit-reveal binding violated by authority {authority} in round {round}")]
    CommitmentMismatch { authority: AuthorityId, round: u32 },

    #[error("parameter agreement failed: {0}")]
    AgreementFailed(String),

    #[error("public parameters unavailable for process {0}")]
    ParametersUnavailable(ProcessInstanceId),

    #[error("no key share for process {0}")]
    NoKeyShare(ProcessInstanceId),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Core(#[from] tessera_core::CoreError),

    #[error(transparent)]
    Policy(#[from] tessera_policy::PolicyError),

    #[error(transparent)]
    Zk(#[from] tessera_zk::ZkError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Why a key request was rejected. The Display form is what goes back over
/// the wire; it never carries secret material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IssuanceError {
    #[error("invalid proof")]
    ProofInvalid,

    #[error("proof targets authority {claimed}, this server is authority {ours}")]
    AuthorityMismatch {
        claimed: AuthorityId,
        ours: AuthorityId,
    },

    #[error("no certified attribute of the claimed type for this reader")]
    AttributeTypeMismatch,

    #[error("proof dated {proof_date} is not valid at {today}")]
    ExpiredAttribute {
        proof_date: CurrentDate,
        today: CurrentDate,
    },

    #[error("commitment does not match any published registry entry")]
    UnknownCommitment,

    #[error("handshake signature invalid")]
    HandshakeSignatureInvalid,

    #[error("no handshake in progress for this reader")]
    HandshakeNotStarted,

    #[error("reader has no published public key")]
    UnknownReaderKey,

    #[error("reader is not certified with this authority")]
    NotCertified,

    #[error("proof verification is disabled on this server")]
    ProofVerificationDisabled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire-protocol faults.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame header is not a decimal length")]
    InvalidHeader,

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("truncated frame")]
    Truncated,

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
