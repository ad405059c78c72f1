use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrecacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Content roots unavailable: {0}")]
    RootsUnavailable(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PrecacheError>;
