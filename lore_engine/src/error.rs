//! Error types for the lore engine.
//!
//! Each concern gets its own enum; [`ImportError`] wraps the ones an import
//! can run into so callers handle a single type per operation.

use lorebook::EntryError;
use thiserror::Error;

/// Failures of the backing key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// Failures of repository mutations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize lorebooks: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] EntryError),
}

/// A single trigger key that could not be evaluated.
#[derive(Debug, Clone, Error)]
pub enum MatchError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Failures extracting a character card from a PNG.
///
/// The display strings are written for end users.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("not a valid PNG file")]
    NotAPng,

    #[error("no character card data found in this PNG; make sure it was exported as a character card")]
    NoEmbeddedCard,

    #[error("character card data is corrupted: {0}")]
    CorruptedCardData(String),

    #[error("character card data is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Failures importing a lorebook.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import file is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unrecognized lorebook format")]
    UnrecognizedFormat,

    #[error(transparent)]
    Card(#[from] CardError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
