use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertifierError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("attribute already certified: {0}")]
    AlreadyCertified(String),

    #[error("no certified attributes for {0}")]
    NotCertified(String),

    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error(transparent)]
    Core(#[from] tessera_core::CoreError),
}

pub type CertifierResult<T> = Result<T, CertifierError>;
