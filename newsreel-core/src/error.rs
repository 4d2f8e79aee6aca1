use thiserror::Error;

use newsreel_model::ModelError;

/// Unified error for the core library.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("indexer error: {0}")]
    Indexer(#[from] crate::indexer::IndexerError),

    #[error("metadata provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("download tool rpc error: {0}")]
    Rpc(#[from] crate::nzbget::RpcError),

    #[error("nntp error: {0}")]
    Nntp(#[from] crate::nntp::NntpError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
