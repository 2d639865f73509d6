//! YAML report generation with analysis annotations

use crate::{
    analyzer::{AnalysisResult, AnalysisStats},
    Result,
};
use chrono::Utc;
use std::fmt::Write as FmtWrite;

/// Generate the annotated YAML report
pub fn generate_yaml(result: &AnalysisResult) -> Result<String> {
    let mut output = String::new();

    // Header with analysis metadata
    write_header(&mut output, &result.stats)?;

    // Version
    writeln!(output, "version: 1")?;
    writeln!(output)?;

    write_resources_section(&mut output, result)?;

    write_warnings_section(&mut output, result)?;

    Ok(output)
}

fn write_header(output: &mut String, stats: &AnalysisStats) -> Result<()> {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    writeln!(output, "# API Usage Index")?;
    writeln!(output, "# Generated: {timestamp}")?;
    writeln!(output, "# Analyzer Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(
        output,
        "# Modules: {} ({} skipped), resources: {}, entry points: {}",
        stats.modules, stats.skipped_modules, stats.resources, stats.entry_points
    )?;
    writeln!(
        output,
        "# SDK call sites: {}, API usages: {}",
        stats.call_sites, stats.usages
    )?;
    writeln!(output)?;

    Ok(())
}

fn write_resources_section(output: &mut String, result: &AnalysisResult) -> Result<()> {
    if result.index.is_empty() {
        writeln!(output, "resources: {{}}")?;
        writeln!(output)?;
        return Ok(());
    }

    writeln!(output, "resources:")?;
    for (file, apis) in result.index.iter() {
        writeln!(output, "  {}:", quote(&file.to_string_lossy()))?;

        writeln!(output, "    implements:")?;
        for resource in &apis.resources {
            writeln!(output, "      - name: {}", quote(&resource.name))?;
            writeln!(output, "        kind: {}", resource.kind)?;
        }

        if apis.namespaces.is_empty() {
            writeln!(output, "    # No API usage detected")?;
            writeln!(output, "    apis: []")?;
            continue;
        }
        writeln!(output, "    apis:")?;
        for ns in &apis.namespaces {
            let versions: Vec<String> = ns.versions.iter().map(|v| quote(v)).collect();
            writeln!(output, "      - namespace: {}", quote(&ns.namespace))?;
            writeln!(output, "        versions: [{}]", versions.join(", "))?;
        }
    }
    writeln!(output)?;

    Ok(())
}

fn write_warnings_section(output: &mut String, result: &AnalysisResult) -> Result<()> {
    if result.warnings.is_empty() {
        return Ok(());
    }

    writeln!(output, "# Warnings ({}) - skipped during analysis", result.warnings.len())?;
    for warning in &result.warnings {
        writeln!(output, "#   {warning}")?;
    }

    Ok(())
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalysisWarning;
    use apiscan_common::{ApiUsage, RegisteredResource, ResourceApiIndex, ResourceApis, ResourceKind};
    use std::path::PathBuf;

    fn result() -> AnalysisResult {
        let mut index = ResourceApiIndex::new();
        index.insert(
            PathBuf::from("internal/services/network/virtual_hub_resource.go"),
            ResourceApis::from_usages(
                vec![RegisteredResource {
                    name: "example_virtual_hub".to_string(),
                    kind: ResourceKind::Resource,
                }],
                vec![
                    ApiUsage::new("Microsoft.Network", "2023-05-01"),
                    ApiUsage::new("Microsoft.Network", "2023-11-01"),
                ],
            ),
        );
        index.insert(
            PathBuf::from("internal/services/network/virtual_hub_data_source.go"),
            ResourceApis::from_usages(
                vec![RegisteredResource {
                    name: "example_virtual_hub".to_string(),
                    kind: ResourceKind::DataSource,
                }],
                vec![],
            ),
        );

        AnalysisResult {
            index,
            warnings: vec![AnalysisWarning::MissingRegistration {
                module: "legacy".to_string(),
            }],
            stats: AnalysisStats {
                modules: 2,
                skipped_modules: 1,
                resources: 2,
                entry_points: 4,
                call_sites: 3,
                usages: 2,
            },
        }
    }

    #[test]
    fn test_generate_yaml_parses() {
        let yaml = generate_yaml(&result()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(value["version"].as_u64(), Some(1));
        let hub = &value["resources"]["internal/services/network/virtual_hub_resource.go"];
        assert_eq!(hub["implements"][0]["kind"].as_str(), Some("resource"));
        assert_eq!(hub["apis"][0]["namespace"].as_str(), Some("Microsoft.Network"));
        assert_eq!(hub["apis"][0]["versions"][0].as_str(), Some("2023-11-01"));
        assert_eq!(hub["apis"][0]["versions"][1].as_str(), Some("2023-05-01"));

        let data_source = &value["resources"]["internal/services/network/virtual_hub_data_source.go"];
        assert_eq!(data_source["apis"].as_sequence().map(Vec::len), Some(0));
    }

    #[test]
    fn test_generate_yaml_annotations() {
        let yaml = generate_yaml(&result()).unwrap();

        assert!(yaml.starts_with("# API Usage Index\n# Generated: "));
        assert!(yaml.contains("# Modules: 2 (1 skipped), resources: 2, entry points: 4"));
        assert!(yaml.contains("# Warnings (1) - skipped during analysis"));
        assert!(yaml.contains("#   legacy: no registration found"));
    }

    #[test]
    fn test_empty_index() {
        let result = AnalysisResult {
            index: ResourceApiIndex::new(),
            warnings: vec![],
            stats: AnalysisStats::default(),
        };
        let yaml = generate_yaml(&result).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(value["resources"].as_mapping().map(|m| m.len()), Some(0));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("2023-11-01"), "\"2023-11-01\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }
}
