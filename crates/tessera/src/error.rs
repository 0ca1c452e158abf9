use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] tessera_core::CoreError),

    #[error(transparent)]
    Authority(#[from] tessera_authority::AuthorityError),

    #[error(transparent)]
    Reader(#[from] tessera_reader::ReaderError),

    #[error(transparent)]
    Certifier(#[from] tessera_certifier::CertifierError),

    #[error(transparent)]
    Policy(#[from] tessera_policy::PolicyError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;
