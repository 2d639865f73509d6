//! API-usage analyzer for Go resource providers
//!
//! Statically discovers which cloud-management APIs (provider namespace plus
//! API version) every resource and data source of a provider calls.
//!
//! The pipeline runs once per service module over a shared, immutable
//! [`apiscan_parser::Program`]:
//!
//! 1. [`RegistrationResolver`] reads the module's `Registration` tables
//! 2. [`EntryPointTracer`] resolves each CRUD verb to its implementation
//! 3. [`SdkCallCollector`] finds calls on SDK client types in the traced files
//! 4. [`ApiPathExtractor`] recovers the request path template of each SDK method
//! 5. [`ApiAggregator`] reduces paths to `(namespace, version)` usages
//!
//! # Examples
//!
//! ```no_run
//! use apiscan_analyzer::ApiAnalyzer;
//!
//! let analyzer = ApiAnalyzer::new("./terraform-provider-azurerm");
//! let result = analyzer.analyze().expect("Analysis failed");
//!
//! for (file, apis) in result.index.iter() {
//!     for ns in &apis.namespaces {
//!         println!("{}: {} {:?}", file.display(), ns.namespace, ns.versions);
//!     }
//! }
//! result.write_yaml("api-usage.yaml").expect("Write failed");
//! ```

mod aggregator;
mod analyzer;
mod collector;
mod extractor;
mod output;
mod registration;
mod tracer;

pub use aggregator::ApiAggregator;
pub use analyzer::{AnalysisResult, AnalysisStats, AnalysisWarning, ApiAnalyzer};
pub use collector::{dedupe_call_sites, CallSite, SdkCallCollector};
pub use extractor::{substitute_verbs, ApiPathExtractor, ApiPathTemplate, TemplateSource};
pub use registration::{
    Implementation, RegistrationEntry, RegistrationResolver, RegistrationShape,
    RegistrationTable, SymbolRef,
};
pub use tracer::{EntryFunction, EntryPoint, EntryPointTracer, TraceFailure, TracedEntry};

use apiscan_common::ConfigError;
use apiscan_parser::ProgramError;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an analysis run
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Failed to load program: {0}")]
    Program(#[from] ProgramError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to format output: {0}")]
    Format(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| AnalyzerError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
