use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZkError {
    #[error("unknown circuit: {0}")]
    UnknownCircuit(String),

    #[error("malformed public signals: {0}")]
    MalformedSignals(String),

    #[error("proving failed: {0}")]
    ProvingFailed(String),
}

pub type ZkResult<T> = Result<T, ZkError>;
