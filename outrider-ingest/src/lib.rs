//! # Outrider Ingest
//!
//! The producer path of the Outrider dispatch engine. Ingestion pulls
//! record metadata from a SQLite store, loads payload files from the
//! instance and user data directories, and pushes the constructed records
//! into the dispatch core at their configured priority.
//!
//! Records whose payloads cannot be loaded are skipped and logged; they
//! never reach the sender stack.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod extractor;
pub mod store;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use extractor::{DataExtractor, ExtractReport, PayloadKind, TemplateCatalog, TemplateEntry};
pub use store::{MetadataStore, TemplateRow, UserTableRow};
