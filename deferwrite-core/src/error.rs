// src/error.rs
use thiserror::Error;

use crate::config::Mode;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Document '{collection}/{id}' not found")]
    DocumentNotFound { collection: String, id: String },

    #[error("Document '{collection}/{id}' already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("Precondition failed for '{document}': {reason}")]
    PreconditionFailed { document: String, reason: String },

    #[error("Transaction conflict not resolved after {attempts} attempt(s)")]
    Conflict { attempts: u32 },

    #[error("Transaction aborted ({mode} mode): {source}")]
    TransactionAborted {
        mode: Mode,
        #[source]
        source: anyhow::Error,
    },

    #[error("Read of '{0}' issued after a write in the same transaction")]
    ReadAfterWrite(String),

    #[error("Batch already committed")]
    BatchCommitted,

    #[error("Invalid '{collection}' entity: {reason}")]
    Validation { collection: String, reason: String },

    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TxError {
    /// Conflicts are the only class the engine retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::Conflict { .. })
    }

    /// Wraps a unit-of-work failure with the mode it ran in.
    pub fn aborted(mode: Mode, source: anyhow::Error) -> Self {
        TxError::TransactionAborted { mode, source }
    }

    /// The `TxError` that caused an abort, if the unit of work failed with one.
    pub fn abort_cause(&self) -> Option<&TxError> {
        match self {
            TxError::TransactionAborted { source, .. } => source.downcast_ref::<TxError>(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TxError>;
