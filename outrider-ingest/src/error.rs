//! Error types for the ingest crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while pulling records out of the metadata store.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Metadata store access failed.
    #[error("metadata store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A payload file named by the store does not exist or is unreadable.
    #[error("payload file {path} could not be read: {source}")]
    PayloadUnreadable {
        /// The resolved payload path.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A metadata row is missing a required column value.
    #[error("table {table}, entry {name}: {message}")]
    InvalidRow {
        /// The metadata table.
        table: String,
        /// The entry's name key.
        name: String,
        /// What was wrong with the row.
        message: String,
    },

    /// Configuration failed validation.
    #[error("ingest configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// The dispatch core refused the record.
    #[error(transparent)]
    Dispatch(#[from] outrider_core::Error),
}

/// Result type alias for ingest operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
