//! Common types and utilities for the apiscan analyzer
//!
//! This crate contains the data model shared by the program loader, the
//! analysis stages and downstream consumers of the API index, plus the
//! analyzer configuration.

mod config;

pub use config::AnalyzerConfig;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or rendering configuration and output
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Whether a registered type name is a managed resource or a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Resource,
    DataSource,
}

impl ResourceKind {
    /// CRUD verbs an implementation of this kind is expected to provide
    pub fn verbs(self) -> &'static [CrudVerb] {
        match self {
            ResourceKind::Resource => &[
                CrudVerb::Create,
                CrudVerb::Read,
                CrudVerb::Update,
                CrudVerb::Delete,
            ],
            ResourceKind::DataSource => &[CrudVerb::Read],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Resource => write!(f, "resource"),
            ResourceKind::DataSource => write!(f, "data_source"),
        }
    }
}

/// One of the four lifecycle operations of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CrudVerb {
    Create,
    Read,
    Update,
    Delete,
}

impl CrudVerb {
    /// Method / field name used for this verb in provider source
    pub fn as_str(self) -> &'static str {
        match self {
            CrudVerb::Create => "Create",
            CrudVerb::Read => "Read",
            CrudVerb::Update => "Update",
            CrudVerb::Delete => "Delete",
        }
    }

    /// Map a resource definition field name to its verb
    ///
    /// Accepts the plain names as well as the `Context` and
    /// `WithoutTimeout` variants of the plugin SDK.
    pub fn from_field(name: &str) -> Option<Self> {
        let base = name
            .strip_suffix("WithoutTimeout")
            .or_else(|| name.strip_suffix("Context"))
            .unwrap_or(name);

        match base {
            "Create" => Some(CrudVerb::Create),
            "Read" => Some(CrudVerb::Read),
            "Update" => Some(CrudVerb::Update),
            "Delete" => Some(CrudVerb::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for CrudVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved (provider namespace, API version) pair
///
/// Ordered by version descending, then namespace ascending, so a sorted
/// collection lists the newest API first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiUsage {
    pub namespace: String,
    pub version: String,
}

impl ApiUsage {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }
}

impl Ord for ApiUsage {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .version
            .cmp(&self.version)
            .then_with(|| self.namespace.cmp(&other.namespace))
    }
}

impl PartialOrd for ApiUsage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ApiUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.namespace, self.version)
    }
}

/// All versions of one provider namespace used by a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceVersions {
    pub namespace: String,
    /// Sorted descending (`YYYY-MM-DD` or `YYYY-MM-DD-preview`)
    pub versions: Vec<String>,
}

/// A type name registered by a service module
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegisteredResource {
    pub name: String,
    pub kind: ResourceKind,
}

/// API usage of the resource(s) implemented in one source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceApis {
    /// Registered names implemented by this file
    pub resources: Vec<RegisteredResource>,
    /// Unique usages, newest version first
    pub usages: Vec<ApiUsage>,
    /// Usages grouped by namespace
    pub namespaces: Vec<NamespaceVersions>,
}

impl ResourceApis {
    /// Build an entry from raw usages, deduplicating and sorting them
    pub fn from_usages(
        resources: Vec<RegisteredResource>,
        usages: impl IntoIterator<Item = ApiUsage>,
    ) -> Self {
        let unique: BTreeSet<ApiUsage> = usages.into_iter().collect();

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for usage in &unique {
            grouped
                .entry(usage.namespace.clone())
                .or_default()
                .push(usage.version.clone());
        }

        // BTreeSet iteration already yields versions newest-first per namespace
        let namespaces = grouped
            .into_iter()
            .map(|(namespace, versions)| NamespaceVersions {
                namespace,
                versions,
            })
            .collect();

        Self {
            resources,
            usages: unique.into_iter().collect(),
            namespaces,
        }
    }

    /// Merge another entry for the same file into this one
    pub fn merge(self, other: ResourceApis) -> Self {
        let mut resources = self.resources;
        for resource in other.resources {
            if !resources.contains(&resource) {
                resources.push(resource);
            }
        }
        Self::from_usages(resources, self.usages.into_iter().chain(other.usages))
    }

    /// Versions recorded for a namespace, newest first
    pub fn versions(&self, namespace: &str) -> Option<&[String]> {
        self.namespaces
            .iter()
            .find(|ns| ns.namespace == namespace)
            .map(|ns| ns.versions.as_slice())
    }
}

/// The analyzer's output: API usage keyed by canonical resource source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceApiIndex {
    entries: BTreeMap<PathBuf, ResourceApis>,
}

impl ResourceApiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, merging with any existing entry for the same file
    pub fn insert(&mut self, file: PathBuf, apis: ResourceApis) {
        let merged = match self.entries.remove(&file) {
            Some(existing) => existing.merge(apis),
            None => apis,
        };
        self.entries.insert(file, merged);
    }

    pub fn get(&self, file: impl AsRef<Path>) -> Option<&ResourceApis> {
        self.entries.get(file.as_ref())
    }

    /// Find the entry implementing a registered type name
    pub fn find_resource(&self, name: &str) -> Option<(&Path, &ResourceApis)> {
        self.entries
            .iter()
            .find(|(_, apis)| apis.resources.iter().any(|r| r.name == name))
            .map(|(path, apis)| (path.as_path(), apis))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &ResourceApis)> {
        self.entries.iter().map(|(path, apis)| (path.as_path(), apis))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the index as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
