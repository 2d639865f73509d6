//! Registration discovery
//!
//! Every service module declares its resources through a `Registration`
//! type. Two shapes are recognised, possibly on the same type:
//!
//! - mapping literal: `SupportedResources()` returns
//!   `map[string]*pluginsdk.Resource{"name": constructor()}`
//! - typed: `Resources()` returns `[]sdk.Resource{FooResource{}}`, each
//!   type naming itself through `ResourceType()`

use apiscan_common::{AnalyzerConfig, ResourceKind};
use apiscan_parser::{syntax, FileId, FuncDecl, GoType, Module, Program, Scope};
use std::fmt;
use tracing::{debug, warn};
use tree_sitter::Node;

const MAPPING_METHODS: [(&str, ResourceKind); 2] = [
    ("SupportedDataSources", ResourceKind::DataSource),
    ("SupportedResources", ResourceKind::Resource),
];

const TYPED_METHODS: [(&str, ResourceKind); 2] = [
    ("DataSources", ResourceKind::DataSource),
    ("Resources", ResourceKind::Resource),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationShape {
    MappingLiteral,
    Typed,
}

/// A package-level declaration: import path plus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolRef {
    pub package: String,
    pub name: String,
}

impl SymbolRef {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.package.rsplit('/').next().unwrap_or(&self.package);
        write!(f, "{short}.{}", self.name)
    }
}

/// How a registered name is implemented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Implementation {
    /// A function returning the resource definition
    Constructor(SymbolRef),
    /// A named type whose methods implement the verbs
    Typed(SymbolRef),
}

impl Implementation {
    pub fn symbol(&self) -> &SymbolRef {
        match self {
            Implementation::Constructor(symbol) | Implementation::Typed(symbol) => symbol,
        }
    }

    pub fn shape(&self) -> RegistrationShape {
        match self {
            Implementation::Constructor(_) => RegistrationShape::MappingLiteral,
            Implementation::Typed(_) => RegistrationShape::Typed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEntry {
    pub resource_type: String,
    pub kind: ResourceKind,
    pub implementation: Implementation,
    /// File of the Registration method listing the entry
    pub declared_in: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationTable {
    pub module: String,
    pub data_sources: Vec<RegistrationEntry>,
    pub resources: Vec<RegistrationEntry>,
}

impl RegistrationTable {
    /// Data sources first, then resources
    pub fn entries(&self) -> impl Iterator<Item = &RegistrationEntry> {
        self.data_sources.iter().chain(self.resources.iter())
    }

    pub fn len(&self) -> usize {
        self.data_sources.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads the registration tables of service modules
pub struct RegistrationResolver<'p> {
    program: &'p Program,
    config: &'p AnalyzerConfig,
}

impl<'p> RegistrationResolver<'p> {
    pub fn new(program: &'p Program, config: &'p AnalyzerConfig) -> Self {
        Self { program, config }
    }

    /// Registration table of a module, or `None` when it declares no Registration type
    pub fn resolve(&self, module: &Module<'p>) -> Option<RegistrationTable> {
        let registration = self.config.registration_type.as_str();
        if !module.index.types.contains_key(registration) {
            warn!(
                module = module.name,
                registration,
                "No registration type found, skipping module"
            );
            return None;
        }

        let mut table = RegistrationTable {
            module: module.name.to_string(),
            data_sources: Vec::new(),
            resources: Vec::new(),
        };

        for kind in [ResourceKind::DataSource, ResourceKind::Resource] {
            let mut methods: Vec<(&FuncDecl, RegistrationShape)> = Vec::new();
            for (name, method_kind) in MAPPING_METHODS {
                if method_kind == kind {
                    if let Some(decl) = module.index.method(registration, name) {
                        methods.push((decl, RegistrationShape::MappingLiteral));
                    }
                }
            }
            for (name, method_kind) in TYPED_METHODS {
                if method_kind == kind {
                    if let Some(decl) = module.index.method(registration, name) {
                        methods.push((decl, RegistrationShape::Typed));
                    }
                }
            }
            methods.sort_by_key(|(decl, _)| decl.location);

            let entries = match kind {
                ResourceKind::DataSource => &mut table.data_sources,
                ResourceKind::Resource => &mut table.resources,
            };
            for (decl, shape) in methods {
                match shape {
                    RegistrationShape::MappingLiteral => {
                        entries.extend(self.mapping_entries(module, decl, kind))
                    }
                    RegistrationShape::Typed => entries.extend(self.typed_entries(module, decl, kind)),
                }
            }
        }

        debug!(
            module = module.name,
            data_sources = table.data_sources.len(),
            resources = table.resources.len(),
            "Resolved registration"
        );
        Some(table)
    }

    fn method_body(&self, decl: &FuncDecl) -> Option<Node<'p>> {
        self.program
            .decl_node(&decl.location)?
            .child_by_field_name("body")
    }

    fn first_literal(body: Node<'p>, literal_type: &str) -> Option<Node<'p>> {
        syntax::find_descendants(body, true, &|node| {
            node.kind() == "composite_literal"
                && node
                    .child_by_field_name("type")
                    .map(|t| t.kind() == literal_type)
                    .unwrap_or(false)
        })
        .into_iter()
        .next()
    }

    fn mapping_entries(
        &self,
        module: &Module<'p>,
        decl: &FuncDecl,
        kind: ResourceKind,
    ) -> Vec<RegistrationEntry> {
        let Some(literal) = self
            .method_body(decl)
            .and_then(|body| Self::first_literal(body, "map_type"))
        else {
            debug!(
                module = module.name,
                method = %decl.name,
                "Registration method has no map literal"
            );
            return Vec::new();
        };

        let file = self.program.file(decl.location.file);
        let mut entries = Vec::new();
        for (key, value) in syntax::keyed_elements(literal) {
            let Some(resource_type) = syntax::string_literal(key, &file.source) else {
                continue;
            };

            match self.constructor_ref(module, decl.location.file, value) {
                Some(symbol) => entries.push(RegistrationEntry {
                    resource_type,
                    kind,
                    implementation: Implementation::Constructor(symbol),
                    declared_in: decl.location.file,
                }),
                None => debug!(
                    module = module.name,
                    resource = %resource_type,
                    kind = %kind,
                    file = %file.relative_path.display(),
                    value = file.text(value),
                    "Registration value is not a constructor call, skipping"
                ),
            }
        }
        entries
    }

    fn constructor_ref(&self, module: &Module<'p>, file: FileId, value: Node<'_>) -> Option<SymbolRef> {
        let value = syntax::strip_address_of(value);
        if value.kind() != "call_expression" {
            return None;
        }
        let function = value.child_by_field_name("function")?;
        let source = self.program.file(file);

        match function.kind() {
            "identifier" => Some(SymbolRef::new(
                module.package.import_path.as_str(),
                source.text(function),
            )),
            "selector_expression" => {
                let operand = function.child_by_field_name("operand")?;
                let field = function.child_by_field_name("field")?;
                let package = source.imports.resolve(source.text(operand))?;
                Some(SymbolRef::new(package, source.text(field)))
            }
            _ => None,
        }
    }

    fn typed_entries(
        &self,
        module: &Module<'p>,
        decl: &FuncDecl,
        kind: ResourceKind,
    ) -> Vec<RegistrationEntry> {
        let Some(literal) = self
            .method_body(decl)
            .and_then(|body| Self::first_literal(body, "slice_type"))
        else {
            debug!(
                module = module.name,
                method = %decl.name,
                "Registration method has no slice literal"
            );
            return Vec::new();
        };

        let file = self.program.file(decl.location.file);
        let scope = Scope::new(self.program, decl.location.file);
        let mut entries = Vec::new();
        for element in syntax::positional_elements(literal) {
            let element = syntax::strip_address_of(element);
            let Some(symbol) = element
                .child_by_field_name("type")
                .filter(|_| element.kind() == "composite_literal")
                .and_then(|ty| scope.resolve_type(ty))
                .and_then(|ty| named_symbol(&ty))
            else {
                debug!(
                    module = module.name,
                    kind = %kind,
                    file = %file.relative_path.display(),
                    value = file.text(element),
                    "Typed registration element is not a type literal, skipping"
                );
                continue;
            };

            match self.resource_type_name(&symbol) {
                Some(resource_type) => entries.push(RegistrationEntry {
                    resource_type,
                    kind,
                    implementation: Implementation::Typed(symbol),
                    declared_in: decl.location.file,
                }),
                None => debug!(
                    module = module.name,
                    kind = %kind,
                    implementation = %symbol,
                    "Typed registration has no ResourceType literal, skipping"
                ),
            }
        }
        entries
    }

    /// The literal returned by a type's `ResourceType()` method
    fn resource_type_name(&self, symbol: &SymbolRef) -> Option<String> {
        let ty = GoType::named(symbol.package.as_str(), symbol.name.as_str());
        let target = self.program.find_method(&ty, "ResourceType")?;
        let body = self.method_body(target.decl)?;
        let file = self.program.file(target.decl.location.file);

        syntax::block_statements(body)
            .into_iter()
            .filter(|statement| statement.kind() == "return_statement")
            .flat_map(syntax::return_values)
            .find_map(|value| syntax::string_literal(value, &file.source))
    }
}

fn named_symbol(ty: &GoType) -> Option<SymbolRef> {
    ty.as_named()
        .map(|(package, name)| SymbolRef::new(package, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{provider, write, MODULE};
    use tracing_test::traced_test;

    fn load(root: &std::path::Path) -> Program {
        Program::load(root, &AnalyzerConfig::default()).unwrap()
    }

    #[test]
    fn test_mapping_literal_registration() {
        let temp = provider();
        write(
            temp.path(),
            "internal/services/network/registration.go",
            r#"package network

import (
	"example.com/provider/internal/services/network/legacy"
	"example.com/provider/internal/tf/pluginsdk"
)

type Registration struct{}

func (r Registration) SupportedDataSources() map[string]*pluginsdk.Resource {
	return map[string]*pluginsdk.Resource{
		"example_virtual_hub": dataSourceVirtualHub(),
	}
}

func (r Registration) SupportedResources() map[string]*pluginsdk.Resource {
	resources := map[string]*pluginsdk.Resource{
		"example_virtual_hub":  resourceVirtualHub(),
		"example_route_table":  legacy.ResourceRouteTable(),
		"example_not_a_call":   resourceTemplate,
	}
	return resources
}
"#,
        );
        write(
            temp.path(),
            "internal/services/network/legacy/route_table.go",
            "package legacy\n",
        );

        let program = load(temp.path());
        let config = AnalyzerConfig::default();
        let resolver = RegistrationResolver::new(&program, &config);
        let table = resolver.resolve(&program.module("network").unwrap()).unwrap();

        assert_eq!(table.data_sources.len(), 1);
        assert_eq!(table.data_sources[0].kind, ResourceKind::DataSource);
        assert_eq!(table.resources.len(), 2);
        assert_eq!(table.len(), 3);

        let route_table = &table.resources[1];
        assert_eq!(route_table.resource_type, "example_route_table");
        assert_eq!(
            route_table.implementation,
            Implementation::Constructor(SymbolRef::new(
                format!("{MODULE}/internal/services/network/legacy"),
                "ResourceRouteTable"
            ))
        );
        assert_eq!(
            table.resources[0].implementation.symbol().package,
            format!("{MODULE}/internal/services/network")
        );
    }

    #[test]
    fn test_typed_and_mixed_registration() {
        let temp = provider();
        write(
            temp.path(),
            "internal/services/containerapps/registration.go",
            r#"package containerapps

import "example.com/provider/internal/tf/pluginsdk"

type Registration struct{}

func (r Registration) SupportedResources() map[string]*pluginsdk.Resource {
	return map[string]*pluginsdk.Resource{
		"example_container_app_legacy": resourceContainerAppLegacy(),
	}
}

func (r Registration) DataSources() []sdk.DataSource {
	return []sdk.DataSource{
		ContainerAppEnvironmentDataSource{},
	}
}

func (r Registration) Resources() []sdk.Resource {
	return []sdk.Resource{
		&ContainerAppEnvironmentResource{},
		UnnamedResource{},
	}
}
"#,
        );
        write(
            temp.path(),
            "internal/services/containerapps/container_app_environment_resource.go",
            r#"package containerapps

type ContainerAppEnvironmentResource struct{}

func (r ContainerAppEnvironmentResource) ResourceType() string {
	return "example_container_app_environment"
}

type ContainerAppEnvironmentDataSource struct{}

func (r ContainerAppEnvironmentDataSource) ResourceType() string {
	return "example_container_app_environment"
}

type UnnamedResource struct{}
"#,
        );

        let program = load(temp.path());
        let config = AnalyzerConfig::default();
        let resolver = RegistrationResolver::new(&program, &config);
        let table = resolver
            .resolve(&program.module("containerapps").unwrap())
            .unwrap();

        assert_eq!(table.data_sources.len(), 1);
        assert_eq!(
            table.data_sources[0].implementation.shape(),
            RegistrationShape::Typed
        );

        let names: Vec<_> = table
            .resources
            .iter()
            .map(|e| e.resource_type.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["example_container_app_legacy", "example_container_app_environment"]
        );
        assert_eq!(
            table.resources[1].implementation,
            Implementation::Typed(SymbolRef::new(
                format!("{MODULE}/internal/services/containerapps"),
                "ContainerAppEnvironmentResource"
            ))
        );
    }

    #[traced_test]
    #[test]
    fn test_missing_registration_warns_once() {
        let temp = provider();
        write(
            temp.path(),
            "internal/services/legacy/helpers.go",
            "package legacy\n\nfunc helper() {}\n",
        );

        let program = load(temp.path());
        let config = AnalyzerConfig::default();
        let resolver = RegistrationResolver::new(&program, &config);

        assert!(resolver.resolve(&program.module("legacy").unwrap()).is_none());
        assert!(logs_contain("No registration type found"));
        logs_assert(|lines: &[&str]| {
            let warnings = lines
                .iter()
                .filter(|line| line.contains("WARN") && line.contains("legacy"))
                .count();
            match warnings {
                1 => Ok(()),
                n => Err(format!("expected one warning, found {n}")),
            }
        });
    }
}
