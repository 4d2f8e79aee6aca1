use thiserror::Error;

/// Errors produced by model constructors and parsing routines.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
