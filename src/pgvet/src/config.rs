//! The pgvet configuration file.
//!
//! A JSON document validated against a fixed schema. The file is consumed,
//! not owned, by the engine: front ends locate it and hand the loaded values
//! over. A malformed file is fatal for the run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{BrandedColumn, ColumnTypesFormat, ManifestConfig};

/// The configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Directory of `V<digits>__<description>.sql` migration files.
    pub migrations_dir: PathBuf,
    /// Major version of the sandbox PostgreSQL server.
    #[serde(default = "default_postgres_version")]
    pub postgres_version: u32,
    /// Layout of rendered column-type literals.
    #[serde(default)]
    pub col_types_format: ColumnTypesFormat,
    /// Enable the strict temporal typing sandbox mode.
    #[serde(default)]
    pub strict_date_time_checking: bool,
    /// Extra SQL type to host type mappings.
    #[serde(default)]
    pub custom_sql_type_mappings: Vec<CustomTypeMapping>,
    /// Branded column type bindings.
    #[serde(default)]
    pub unique_table_column_types: Vec<BrandedColumn>,
}

fn default_postgres_version() -> u32 {
    16
}

/// Maps one SQL type name to a host type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomTypeMapping {
    /// The `pg_type.typname` to match.
    pub sql_type: String,
    /// The host type name to map it to.
    pub host_type: String,
}

/// An error loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON or does not match the schema.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The migrations directory does not exist.
    #[error("migrations directory does not exist: {path}")]
    MigrationsDirMissing {
        /// The missing directory.
        path: PathBuf,
    },
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        if !config.migrations_dir.is_dir() {
            return Err(ConfigError::MigrationsDirMissing {
                path: config.migrations_dir.clone(),
            });
        }
        Ok(config)
    }

    /// The per-manifest engine configuration this file implies.
    pub fn manifest_config(&self) -> ManifestConfig {
        ManifestConfig {
            strict_temporal_typing: self.strict_date_time_checking,
            column_types_format: self.col_types_format,
        }
    }

    /// The custom type mappings as `(sql, host)` pairs.
    pub fn custom_mappings(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.custom_sql_type_mappings
            .iter()
            .map(|m| (m.sql_type.clone(), m.host_type.clone()))
    }
}
