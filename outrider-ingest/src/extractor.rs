//! Record extraction: metadata rows plus payload files become dispatch
//! records.
//!
//! The extractor walks user-table entries in the metadata store, loads
//! each payload file from the user data directory, and pushes the
//! resulting record into the dispatch engine. Entries whose payload is
//! missing are skipped and logged, never enqueued. Template (instance)
//! entries load from a separate directory into an in-memory catalog.

use crate::config::IngestConfig;
use crate::store::MetadataStore;
use crate::{IngestError, IngestResult};
use bytes::Bytes;
use outrider_core::{DispatchEngine, Priority, Record};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Which payload directory a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Template (instance) payloads.
    Instance,
    /// User table payloads.
    User,
}

/// Outcome of an extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Records pushed into the dispatch engine.
    pub pushed: usize,
    /// Entries skipped because of missing payloads or bad rows.
    pub skipped: usize,
}

/// A template loaded into the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    /// Processing algorithm tag.
    pub algorithm: String,
    /// Raw template payload.
    pub payload: Bytes,
}

/// In-memory catalog of instance templates.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    entries: HashMap<String, TemplateEntry>,
}

impl TemplateCatalog {
    /// Look up a template by instance name.
    pub fn get(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.get(name)
    }

    /// Number of loaded templates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pulls records out of the store and into the engine.
#[derive(Debug)]
pub struct DataExtractor {
    config: IngestConfig,
}

impl DataExtractor {
    /// Create an extractor over validated configuration.
    ///
    /// # Errors
    /// Returns [`IngestError::Configuration`] when the configuration is
    /// invalid.
    pub fn new(config: IngestConfig) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Resolve a payload file path.
    fn payload_path(&self, file_name: &str, kind: PayloadKind) -> PathBuf {
        match kind {
            PayloadKind::Instance => self.config.template_data_dir.join(file_name),
            PayloadKind::User => self.config.user_data_dir.join(file_name),
        }
    }

    /// Read a payload file, stripping carriage returns.
    ///
    /// # Errors
    /// Returns [`IngestError::PayloadUnreadable`] when the file cannot be
    /// read.
    pub fn load_payload(&self, file_name: &str, kind: PayloadKind) -> IngestResult<Bytes> {
        let path = self.payload_path(file_name, kind);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| IngestError::PayloadUnreadable { path: path.clone(), source })?;
        let cleaned: String = text.chars().filter(|&c| c != '\r').collect();
        Ok(Bytes::from(cleaned))
    }

    /// Extract the named user tables and push them into the engine.
    ///
    /// Entries with missing payloads or unusable rows are skipped and
    /// counted; the pass keeps going.
    ///
    /// # Errors
    /// Returns a database error if the store fails, or a dispatch error if
    /// the engine refuses a record (e.g. during shutdown).
    pub fn extract_user_tables(
        &self,
        store: &MetadataStore,
        names: &[String],
        engine: &DispatchEngine,
    ) -> IngestResult<ExtractReport> {
        let mut report = ExtractReport::default();
        if names.is_empty() {
            info!("no new user data");
            return Ok(report);
        }

        for name in names {
            if name.is_empty() {
                warn!("empty user table name, skipping");
                report.skipped += 1;
                continue;
            }

            let Some(row) = store.user_table(name)? else {
                warn!(table = name.as_str(), "user table has no metadata row, skipping");
                report.skipped += 1;
                continue;
            };
            if row.alias.is_empty() {
                error!(table = name.as_str(), "user table row has an empty alias, skipping");
                report.skipped += 1;
                continue;
            }

            let payload = match self.load_payload(&row.name, PayloadKind::User) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(table = name.as_str(), error = %err, "payload load failed, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let priority = Priority::from_level(row.priority);
            let record = match Record::new(&row.name, &row.alias, priority, &row.algorithm, payload)
            {
                Ok(record) => record,
                Err(err) => {
                    error!(table = name.as_str(), error = %err, "record rejected, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            info!(
                table = row.name.as_str(),
                alias = row.alias.as_str(),
                %priority,
                algorithm = row.algorithm.as_str(),
                "pushing user table record"
            );
            engine.push_record(record)?;
            report.pushed += 1;
        }

        info!(pushed = report.pushed, skipped = report.skipped, "user table extraction done");
        Ok(report)
    }

    /// Load the named templates into a catalog.
    ///
    /// # Errors
    /// Returns a database error if the store fails; individual missing
    /// payloads are skipped.
    pub fn extract_templates(
        &self,
        store: &MetadataStore,
        names: &[String],
    ) -> IngestResult<TemplateCatalog> {
        let mut catalog = TemplateCatalog::default();

        for name in names {
            if name.is_empty() {
                continue;
            }
            let Some(row) = store.template(name)? else {
                warn!(instance = name.as_str(), "template has no metadata row, skipping");
                continue;
            };
            match self.load_payload(&row.file_id, PayloadKind::Instance) {
                Ok(payload) => {
                    catalog.entries.insert(
                        row.name.clone(),
                        TemplateEntry { algorithm: row.algorithm, payload },
                    );
                }
                Err(err) => {
                    error!(instance = name.as_str(), error = %err, "template payload missing");
                }
            }
        }

        info!(loaded = catalog.len(), "template extraction done");
        Ok(catalog)
    }
}
