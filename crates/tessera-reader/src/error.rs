use thiserror::Error;

use tessera_core::{AttrType, AttributeLabel, AuthorityId, ContentId, MessageId, SliceId};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("request rejected by authority: {0}")]
    Rejected(String),

    #[error("no authority address configured for {0}")]
    UnknownAuthority(AuthorityId),

    #[error("public parameters unavailable: {0}")]
    ParametersUnavailable(String),

    #[error("no ciphertext pointer for message {0}")]
    PointerNotFound(MessageId),

    #[error("ciphertext {0} missing from the content store")]
    RecordMissing(ContentId),

    #[error("ciphertext metadata mismatch: {0}")]
    MetadataMismatch(String),

    #[error("slice {0:?} not found in ciphertext")]
    SliceNotFound(Option<SliceId>),

    #[error("decryption aborted; missing fragments for {0:?}")]
    MissingFragment(Vec<AttributeLabel>),

    #[error("fragment collision for authority {authority} type {attr_type}")]
    FragmentCollision {
        authority: AuthorityId,
        attr_type: AttrType,
    },

    #[error("malformed ciphertext record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Protocol(#[from] tessera_authority::ProtocolError),

    #[error(transparent)]
    Core(#[from] tessera_core::CoreError),

    #[error(transparent)]
    Policy(#[from] tessera_policy::PolicyError),

    #[error(transparent)]
    Zk(#[from] tessera_zk::ZkError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReaderResult<T> = Result<T, ReaderError>;
