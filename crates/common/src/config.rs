//! Analyzer configuration loading from YAML files
//!
//! Every field has a default tuned for the Azure provider layout, so an
//! empty document (or no file at all) yields a usable configuration.

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tunables for program loading and API discovery
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Directory (relative to the root) holding one package per service
    pub services_dir: PathBuf,
    /// Name of the per-module type that declares resources
    pub registration_type: String,
    /// Regex matched against the import path declaring an SDK client type
    pub sdk_import_pattern: String,
    /// Regex with one capture group extracting the provider namespace from a path template
    pub namespace_pattern: String,
    /// Regex with one capture group extracting the API version from an import path
    pub version_pattern: String,
    /// SDK method names that never carry a request path (identity/stringification helpers)
    pub skipped_methods: Vec<String>,
    /// Extra directory names skipped while walking the source tree
    pub exclude_dirs: Vec<String>,
    /// Bound on wrapper unwrapping and path resolution recursion
    pub max_trace_depth: usize,
    /// Treat syntax errors in loaded files as fatal
    pub strict_syntax: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            services_dir: PathBuf::from("internal/services"),
            registration_type: "Registration".to_string(),
            sdk_import_pattern: r"^github\.com/hashicorp/go-azure-sdk/resource-manager/".to_string(),
            namespace_pattern: r"(?i)providers/([^/%]+)(?:/|$)".to_string(),
            version_pattern: r"/(\d{4}-\d{2}-\d{2}(?:-preview)?)(?:/|$)".to_string(),
            skipped_methods: vec!["ID".to_string(), "String".to_string(), "Segments".to_string()],
            exclude_dirs: Vec::new(),
            max_trace_depth: 8,
            strict_syntax: false,
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text; missing fields keep their defaults
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Whether a method name is excluded before path extraction
    pub fn is_skipped_method(&self, method: &str) -> bool {
        self.skipped_methods.iter().any(|m| m == method)
    }
}
