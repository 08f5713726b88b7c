//! Ingest configuration: store location and payload directories.

use crate::{IngestError, IngestResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the producer path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite metadata store path.
    pub database_path: PathBuf,
    /// Directory holding template (instance) payload files.
    pub template_data_dir: PathBuf,
    /// Directory holding user payload files.
    pub user_data_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("outrider.db"),
            template_data_dir: PathBuf::from("data/templates"),
            user_data_dir: PathBuf::from("data/user"),
        }
    }
}

impl IngestConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`IngestError::Configuration`] when the two payload
    /// directories collide, which would make instance and user files
    /// indistinguishable.
    pub fn validate(&self) -> IngestResult<()> {
        if self.template_data_dir == self.user_data_dir {
            return Err(IngestError::Configuration {
                message: "template_data_dir and user_data_dir must differ".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_colliding_directories() {
        let config = IngestConfig {
            template_data_dir: PathBuf::from("data"),
            user_data_dir: PathBuf::from("data"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
