// src/errors.rs

//! Library error type. Store failures keep their own [`StoreError`] and are
//! wrapped here when they reach an engine operation.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::JobInstanceId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fatal startup error: {0}")]
    FatalStartup(String),

    #[error("Engine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("History for job instance {id} could not be written after {attempts} attempts: {source}")]
    HistoryWriteFailed {
        id: JobInstanceId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
