//! The r/w mapping file: which HTTP paths map onto which tables, and how.
//!
//! ```toml
//! [paths."/drafts/content/:uuid/annotations"]
//! table = "draft_annotations"
//! primary_key = "uuid"
//! conflict_detection = true
//!
//! [paths."/drafts/content/:uuid/annotations".columns]
//! uuid = ":uuid"
//! body = "$"
//! last_modified = "@._timestamp"
//! publish_ref = "@.x-request-id"
//!
//! [paths."/drafts/content/:uuid/annotations".response.headers]
//! Last-Modified = "last_modified"
//! ```

use crate::domain::error::MappingError;
use crate::domain::mapping::{MappingRegistry, TableMapping};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read r/w configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse r/w configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid mapping for path {path}: {source}")]
    Mapping {
        path: String,
        #[source]
        source: MappingError,
    },

    #[error(transparent)]
    Registry(#[from] MappingError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RwConfig {
    #[serde(default)]
    pub paths: BTreeMap<String, PathMapping>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMapping {
    pub table: String,
    pub primary_key: String,
    #[serde(default)]
    pub conflict_detection: bool,
    /// column -> expression
    pub columns: BTreeMap<String, String>,
    /// column -> SQL type the bound text is cast to
    #[serde(default)]
    pub types: BTreeMap<String, String>,
    #[serde(default)]
    pub response: ResponseMapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseMapping {
    /// header -> column
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// body property -> column
    #[serde(default)]
    pub body_append: BTreeMap<String, String>,
}

impl RwConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validates every path's mapping and builds the table registry.
    pub fn registry(&self) -> Result<MappingRegistry, ConfigError> {
        let mut mappings = Vec::with_capacity(self.paths.len());
        for (path, cfg) in &self.paths {
            let mapping = cfg.table_mapping().map_err(|source| ConfigError::Mapping {
                path: path.clone(),
                source,
            })?;
            mappings.push(mapping);
        }
        Ok(MappingRegistry::new(mappings)?)
    }

    /// `(path, table)` for every configured endpoint.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths
            .iter()
            .map(|(path, cfg)| (path.as_str(), cfg.table.as_str()))
    }
}

impl PathMapping {
    pub fn table_mapping(&self) -> Result<TableMapping, MappingError> {
        let mut builder = TableMapping::builder(&self.table, &self.primary_key)
            .conflict_detection(self.conflict_detection);
        for (column, expr) in &self.columns {
            builder = builder.column(column, expr);
        }
        for (column, sql_type) in &self.types {
            builder = builder.cast(column, sql_type);
        }
        for (header, column) in &self.response.headers {
            builder = builder.expose_as_header(column, header);
        }
        for (property, column) in &self.response.body_append {
            builder = builder.merge_into_body(column, property);
        }
        builder.build()
    }
}
