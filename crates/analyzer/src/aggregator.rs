//! Reduction of call sites to `(namespace, version)` usages

use crate::collector::CallSite;
use crate::{compile_pattern, Result};
use apiscan_common::{AnalyzerConfig, ApiUsage, RegisteredResource};
use apiscan_parser::Program;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

pub struct ApiAggregator<'p> {
    program: &'p Program,
    namespace_pattern: Regex,
    version_pattern: Regex,
}

impl<'p> ApiAggregator<'p> {
    pub fn new(program: &'p Program, config: &AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            program,
            namespace_pattern: compile_pattern(&config.namespace_pattern)?,
            version_pattern: compile_pattern(&config.version_pattern)?,
        })
    }

    /// Provider namespace of a path template
    ///
    /// Nested resources such as role assignments scoped to another provider's
    /// resource name the owning namespace last, so the last match wins.
    pub fn namespace_of(&self, template: &str) -> Option<String> {
        self.namespace_pattern
            .captures_iter(template)
            .last()
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// API version encoded in an SDK package import path
    pub fn version_of(&self, import_path: &str) -> Option<String> {
        self.version_pattern
            .captures(import_path)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn usage(&self, resource: &RegisteredResource, site: &CallSite) -> Option<ApiUsage> {
        let path = site.api_path.as_ref()?;
        let namespace = self.namespace_of(&path.text);
        let version = self.version_of(&site.package);

        match (namespace, version) {
            (Some(namespace), Some(version)) => Some(ApiUsage::new(namespace, version)),
            (namespace, version) => {
                debug!(
                    resource = %resource.name,
                    kind = %resource.kind,
                    file = %self.program.file(site.caller_file).relative_path.display(),
                    line = site.line,
                    method = %site.method,
                    package = %site.package,
                    path = %path.text,
                    namespace_matched = namespace.is_some(),
                    version_matched = version.is_some(),
                    "Provider namespace or API version not found, skipping"
                );
                None
            }
        }
    }

    /// Unique usages of one resource, newest version first
    pub fn aggregate(&self, resource: &RegisteredResource, sites: &[CallSite]) -> Vec<ApiUsage> {
        let usages: BTreeSet<ApiUsage> = sites
            .iter()
            .filter_map(|site| self.usage(resource, site))
            .collect();
        usages.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ApiPathTemplate, TemplateSource};
    use crate::testing::{provider, MODULE, SDK};
    use apiscan_common::ResourceKind;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn program() -> (TempDir, Program) {
        let temp = provider();
        let program = Program::load(temp.path(), &AnalyzerConfig::default()).unwrap();
        (temp, program)
    }

    fn aggregator(program: &Program) -> ApiAggregator<'_> {
        ApiAggregator::new(program, &AnalyzerConfig::default()).unwrap()
    }

    fn hub() -> RegisteredResource {
        RegisteredResource {
            name: "example_virtual_hub".to_string(),
            kind: ResourceKind::Resource,
        }
    }

    fn site(program: &Program, package: &str, path: Option<&str>) -> CallSite {
        let location = program
            .method_decl(&format!("{MODULE}/internal/tf/pluginsdk"), "ResourceData", "Id")
            .unwrap()
            .location;
        CallSite {
            method: "Get".to_string(),
            receiver_type: "test.Client".to_string(),
            package: format!("{SDK}/{package}"),
            declaration: location,
            caller_file: location.file,
            line: 1,
            api_path: path.map(|text| ApiPathTemplate {
                text: text.to_string(),
                source: TemplateSource::Literal,
            }),
        }
    }

    #[test]
    fn test_namespace_last_match() {
        let (_temp, program) = program();
        let aggregator = aggregator(&program);
        assert_eq!(
            aggregator.namespace_of(
                "/subscriptions/%s/resourceGroups/%s/providers/Microsoft.Network/virtualHubs/%s"
            ),
            Some("Microsoft.Network".to_string())
        );
        assert_eq!(
            aggregator.namespace_of(
                "/%s/providers/Microsoft.Storage/storageAccounts/%s/providers/Microsoft.Authorization/roleAssignments/%s"
            ),
            Some("Microsoft.Authorization".to_string())
        );
        assert_eq!(aggregator.namespace_of("/subscriptions/%s/PROVIDERS/microsoft.app"), Some("microsoft.app".to_string()));
        assert_eq!(aggregator.namespace_of("%s/providers/%s/things"), None);
        assert_eq!(aggregator.namespace_of("/subscriptions/%s"), None);
    }

    #[test]
    fn test_version_from_import_path() {
        let (_temp, program) = program();
        let aggregator = aggregator(&program);
        assert_eq!(
            aggregator.version_of(&format!("{SDK}/network/2023-11-01/virtualhubs")),
            Some("2023-11-01".to_string())
        );
        assert_eq!(
            aggregator.version_of(&format!("{SDK}/containerapps/2025-01-01-preview/containerapps")),
            Some("2025-01-01-preview".to_string())
        );
        assert_eq!(aggregator.version_of("github.com/example/sdk/virtualhubs"), None);
    }

    #[test]
    fn test_aggregate_dedupes_and_sorts() {
        let (_temp, program) = program();
        let aggregator = aggregator(&program);
        let hubs = "/providers/Microsoft.Network/virtualHubs/%s";
        let sites = vec![
            site(&program, "network/2022-07-01/virtualhubs", Some(hubs)),
            site(&program, "network/2023-11-01/virtualhubs", Some(hubs)),
            site(&program, "network/2023-11-01/virtualhubs", Some("/providers/Microsoft.Network/routeTables/%s")),
            site(&program, "containerapps/2025-01-01-preview/managedenvironments", Some("/providers/Microsoft.App/x")),
            site(&program, "network/2024-01-01/virtualhubs", None),
            site(&program, "network/virtualhubs", Some(hubs)),
        ];

        let usages = aggregator.aggregate(&hub(), &sites);
        assert_eq!(
            usages,
            vec![
                ApiUsage::new("Microsoft.App", "2025-01-01-preview"),
                ApiUsage::new("Microsoft.Network", "2023-11-01"),
                ApiUsage::new("Microsoft.Network", "2022-07-01"),
            ]
        );
        assert_eq!(aggregator.aggregate(&hub(), &sites), usages);
    }

    #[test]
    fn test_invalid_namespace_pattern() {
        let (_temp, program) = program();
        let config = AnalyzerConfig {
            namespace_pattern: "providers/(".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ApiAggregator::new(&program, &config),
            Err(crate::AnalyzerError::InvalidPattern { pattern, .. }) if pattern == "providers/("
        ));
    }

    #[test]
    fn test_usage_requires_template() {
        let (_temp, program) = program();
        let aggregator = aggregator(&program);
        assert!(aggregator
            .usage(&hub(), &site(&program, "network/2023-11-01/virtualhubs", None))
            .is_none());
    }

    #[traced_test]
    #[test]
    fn test_unmatched_site_logged_with_resource_context() {
        let (_temp, program) = program();
        let aggregator = aggregator(&program);
        let unversioned = site(&program, "network/virtualhubs", Some("/providers/Microsoft.Network/x"));

        assert!(aggregator.usage(&hub(), &unversioned).is_none());
        assert!(logs_contain("Provider namespace or API version not found"));
        assert!(logs_contain("resource=example_virtual_hub"));
        assert!(logs_contain("kind=resource"));
        assert!(logs_contain("file=internal/tf/pluginsdk/resource.go"));
    }
}
