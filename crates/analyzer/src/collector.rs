//! SDK call-site collection
//!
//! Walks every function declared in the files a resource spans and keeps the
//! method calls whose receiver is a struct type from an SDK package.

use crate::extractor::ApiPathTemplate;
use crate::{compile_pattern, Result};
use apiscan_common::{AnalyzerConfig, RegisteredResource};
use apiscan_parser::{syntax, walk, DeclLocation, FileId, Program, Scope, TypeKind};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use tree_sitter::Node;

/// A call to an SDK client method from provider code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub method: String,
    /// `package.Type` of the receiver, using the package's last path segment
    pub receiver_type: String,
    /// Import path of the package declaring the receiver type
    pub package: String,
    pub declaration: DeclLocation,
    pub caller_file: FileId,
    pub line: usize,
    pub api_path: Option<ApiPathTemplate>,
}

pub struct SdkCallCollector<'p> {
    program: &'p Program,
    config: &'p AnalyzerConfig,
    sdk_pattern: Regex,
}

impl<'p> SdkCallCollector<'p> {
    pub fn new(program: &'p Program, config: &'p AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            program,
            config,
            sdk_pattern: compile_pattern(&config.sdk_import_pattern)?,
        })
    }

    /// Collect SDK calls made on behalf of `resource` from every function in
    /// `files`, in source order
    pub fn collect(&self, resource: &RegisteredResource, files: &BTreeSet<FileId>) -> Vec<CallSite> {
        let mut sites = Vec::new();

        for &file in files {
            let package = self.program.file(file).package;
            for decl in self.program.index(package).funcs_in_file(file) {
                let Some(node) = self.program.decl_node(&decl.location) else {
                    continue;
                };
                let Some(body) = node.child_by_field_name("body") else {
                    continue;
                };

                let mut scope = Scope::for_function(self.program, file, node);
                walk(&mut scope, body, &mut |scope, node| {
                    if node.kind() == "call_expression" {
                        if let Some(site) = self.call_site(resource, scope, node) {
                            sites.push(site);
                        }
                    }
                });
            }
        }

        debug!(
            resource = %resource.name,
            files = files.len(),
            call_sites = sites.len(),
            "Collected SDK call sites"
        );
        sites
    }

    fn call_site(&self, resource: &RegisteredResource, scope: &Scope<'_>, call: Node<'_>) -> Option<CallSite> {
        let function = call.child_by_field_name("function")?;
        if function.kind() != "selector_expression" {
            return None;
        }
        let operand = function.child_by_field_name("operand")?;
        let method = scope.text(function.child_by_field_name("field")?);

        // package-level function, not a method call
        if operand.kind() == "identifier" && scope.import_path(scope.text(operand)).is_some() {
            return None;
        }

        let ty = scope.type_of(operand)?;
        let (package, type_name) = ty.as_named()?;
        if !self.sdk_pattern.is_match(package) {
            return None;
        }
        let type_decl = self.program.type_decl(package, type_name)?;
        if !matches!(type_decl.kind, TypeKind::Struct(_)) || self.config.is_skipped_method(method) {
            return None;
        }

        let line = syntax::line(call);
        let Some(target) = self.program.find_method(&ty, method) else {
            debug!(
                resource = %resource.name,
                kind = %resource.kind,
                method,
                package,
                file = %scope.file().relative_path.display(),
                line,
                "SDK method declaration not found, skipping"
            );
            return None;
        };

        Some(CallSite {
            method: method.to_string(),
            receiver_type: format!("{}.{}", short_package(package), type_name),
            package: package.to_string(),
            declaration: target.decl.location,
            caller_file: scope.file().id,
            line,
            api_path: None,
        })
    }
}

fn short_package(import_path: &str) -> &str {
    import_path.rsplit('/').next().unwrap_or(import_path)
}

/// Drop repeated `(method, package, api_path)` sites, keeping the first
pub fn dedupe_call_sites(sites: Vec<CallSite>) -> Vec<CallSite> {
    let mut seen = HashSet::new();
    sites
        .into_iter()
        .filter(|site| {
            let path = site.api_path.as_ref().map(|p| p.text.clone());
            seen.insert((site.method.clone(), site.package.clone(), path))
        })
        .collect()
}
