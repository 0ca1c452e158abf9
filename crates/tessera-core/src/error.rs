use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid attribute label: {0}")]
    InvalidLabel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ledger entry already published with a different value: {0}")]
    AlreadyPublished(String),

    #[error("ledger transaction failed: {0}")]
    TransactionFailed(String),

    #[error("content store error: {0}")]
    ContentStore(String),

    #[error("content digest mismatch for {0}")]
    ContentDigestMismatch(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signature error: {0}")]
    Signature(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
