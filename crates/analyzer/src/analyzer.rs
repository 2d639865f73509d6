//! Core API-usage analysis orchestration

use crate::{
    aggregator::ApiAggregator,
    collector::{dedupe_call_sites, SdkCallCollector},
    extractor::{ApiPathExtractor, ApiPathTemplate},
    output,
    registration::RegistrationResolver,
    tracer::{EntryPointTracer, TraceFailure},
    AnalyzerError, Result,
};
use apiscan_common::{
    AnalyzerConfig, CrudVerb, RegisteredResource, ResourceApiIndex, ResourceApis, ResourceKind,
};
use apiscan_parser::{DeclLocation, Program};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// API usage analyzer - main entry point
#[derive(Debug, Clone)]
pub struct ApiAnalyzer {
    root: PathBuf,
    config: AnalyzerConfig,
}

/// Complete analysis result
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// API usage keyed by canonical resource file
    pub index: ResourceApiIndex,
    /// Recoverable failures, in the order they were hit
    pub warnings: Vec<AnalysisWarning>,
    pub stats: AnalysisStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    pub modules: usize,
    pub skipped_modules: usize,
    pub resources: usize,
    pub entry_points: usize,
    pub call_sites: usize,
    pub usages: usize,
}

/// Something the analysis skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisWarning {
    MissingRegistration {
        module: String,
    },
    UntracedEntry {
        module: String,
        resource: String,
        kind: ResourceKind,
        /// `None` when the whole entry was skipped
        verb: Option<CrudVerb>,
        reason: TraceFailure,
    },
}

impl fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisWarning::MissingRegistration { module } => {
                write!(f, "{module}: no registration found")
            }
            AnalysisWarning::UntracedEntry {
                module,
                resource,
                kind,
                verb: Some(verb),
                reason,
            } => write!(f, "{module}: {kind} {resource} {verb}: {reason}"),
            AnalysisWarning::UntracedEntry {
                module,
                resource,
                kind,
                verb: None,
                reason,
            } => write!(f, "{module}: {kind} {resource}: {reason}"),
        }
    }
}

impl ApiAnalyzer {
    /// Create an analyzer for the provider checkout at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: AnalyzerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Load the program and run the full analysis pipeline
    pub fn analyze(&self) -> Result<AnalysisResult> {
        info!(root = %self.root.display(), "Starting API usage analysis");
        let program = Program::load(&self.root, &self.config)?;
        self.analyze_program(&program)
    }

    /// Analyse every module of an already loaded program, in name order
    pub fn analyze_program(&self, program: &Program) -> Result<AnalysisResult> {
        let resolver = RegistrationResolver::new(program, &self.config);
        let tracer = EntryPointTracer::new(program, &self.config);
        let collector = SdkCallCollector::new(program, &self.config)?;
        let extractor = ApiPathExtractor::new(program, &self.config);
        let aggregator = ApiAggregator::new(program, &self.config)?;

        // SDK methods are shared by many resources
        let mut templates: BTreeMap<DeclLocation, Option<ApiPathTemplate>> = BTreeMap::new();

        let mut index = ResourceApiIndex::new();
        let mut warnings = Vec::new();
        let mut stats = AnalysisStats::default();

        for module in program.modules() {
            stats.modules += 1;

            // Phase 1: Registration tables
            let Some(table) = resolver.resolve(&module) else {
                stats.skipped_modules += 1;
                warnings.push(AnalysisWarning::MissingRegistration {
                    module: module.name.to_string(),
                });
                continue;
            };

            for entry in table.entries() {
                stats.resources += 1;

                // Phase 2: Entry points
                let traced = tracer.trace(module.name, entry);
                warnings.extend(traced.failures.iter().map(|(verb, reason)| {
                    AnalysisWarning::UntracedEntry {
                        module: module.name.to_string(),
                        resource: entry.resource_type.clone(),
                        kind: entry.kind,
                        verb: *verb,
                        reason: reason.clone(),
                    }
                }));
                let Some(canonical) = traced.canonical_file else {
                    continue;
                };
                if traced.entry_points.is_empty() {
                    continue;
                }
                stats.entry_points += traced.entry_points.len();

                let resource = RegisteredResource {
                    name: entry.resource_type.clone(),
                    kind: entry.kind,
                };

                // Phase 3: SDK calls and their request paths
                let mut sites = collector.collect(&resource, &traced.files());
                for site in &mut sites {
                    let declaration = site.declaration;
                    site.api_path = templates
                        .entry(declaration)
                        .or_insert_with(|| extractor.extract_from(&declaration))
                        .clone();
                    if site.api_path.is_none() {
                        debug!(
                            module = module.name,
                            resource = %resource.name,
                            kind = %resource.kind,
                            file = %program.file(site.caller_file).relative_path.display(),
                            line = site.line,
                            method = %site.method,
                            package = %site.package,
                            "No request path found, skipping"
                        );
                    }
                }
                let sites = dedupe_call_sites(sites);
                stats.call_sites += sites.len();

                // Phase 4: Usages
                let usages = aggregator.aggregate(&resource, &sites);
                index.insert(
                    program.file(canonical).relative_path.clone(),
                    ResourceApis::from_usages(vec![resource], usages),
                );
            }
        }

        stats.usages = index.iter().map(|(_, apis)| apis.usages.len()).sum();
        info!(
            modules = stats.modules,
            skipped_modules = stats.skipped_modules,
            resources = stats.resources,
            entry_points = stats.entry_points,
            call_sites = stats.call_sites,
            usages = stats.usages,
            warnings = warnings.len(),
            "API usage analysis complete"
        );

        Ok(AnalysisResult {
            index,
            warnings,
            stats,
        })
    }
}

impl AnalysisResult {
    /// Write the annotated YAML report to a file
    pub fn write_yaml(&self, output_path: impl AsRef<Path>) -> Result<()> {
        let path = output_path.as_ref();
        let yaml_content = output::generate_yaml(self)?;
        fs::write(path, yaml_content).map_err(|source| AnalyzerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the annotated YAML report as a string
    pub fn to_yaml(&self) -> Result<String> {
        output::generate_yaml(self)
    }

    /// The bare index as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(self.index.to_json()?)
    }

    pub fn warnings_for<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a AnalysisWarning> + 'a {
        self.warnings.iter().filter(move |w| match w {
            AnalysisWarning::MissingRegistration { module: m }
            | AnalysisWarning::UntracedEntry { module: m, .. } => m == module,
        })
    }
}
