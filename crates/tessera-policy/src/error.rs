use thiserror::Error;

use tessera_core::AttributeLabel;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy parse error: {0}")]
    Parse(String),

    #[error("invalid parameter element: {0}")]
    InvalidElement(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("policy not satisfied; missing fragments for {missing:?}")]
    NotSatisfied { missing: Vec<AttributeLabel> },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
