//! Entry-point tracing
//!
//! Resolves every CRUD verb of a registered resource to the function that
//! implements it, unwrapping delegating wrappers along the way. A function
//! is a delegating wrapper when its body consists only of `return <call>`
//! statements, possibly nested in `if` branches; when those calls resolve to
//! exactly one in-module declaration the tracer follows it.

use crate::registration::{Implementation, RegistrationEntry, SymbolRef};
use apiscan_common::{AnalyzerConfig, CrudVerb, ResourceKind};
use apiscan_parser::{syntax, Callee, DeclLocation, FileId, GoType, Program, Scope};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;
use tree_sitter::Node;

/// The function implementing a verb
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryFunction {
    /// A named function, or `Type.Method`
    Declared {
        package: String,
        name: String,
        location: DeclLocation,
    },
    /// An inline function literal in a resource definition
    Literal { file: FileId, line: usize },
}

/// The resolved implementation of one verb of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub resource_type: String,
    pub kind: ResourceKind,
    pub verb: CrudVerb,
    pub function: EntryFunction,
    /// Every file visited while unwrapping
    pub files: BTreeSet<FileId>,
}

/// Why a verb (or a whole entry, when no verb is attached) was not traced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceFailure {
    Ambiguous { candidates: Vec<String> },
    MissingImplementation,
    NoResourceDefinition,
    DepthExceeded,
}

impl fmt::Display for TraceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFailure::Ambiguous { candidates } => {
                write!(f, "ambiguous delegation between {}", candidates.join(", "))
            }
            TraceFailure::MissingImplementation => write!(f, "implementation not found"),
            TraceFailure::NoResourceDefinition => write!(f, "no resource definition found"),
            TraceFailure::DepthExceeded => write!(f, "trace depth exceeded"),
        }
    }
}

/// Outcome of tracing one registration entry
#[derive(Debug, Clone, Default)]
pub struct TracedEntry {
    /// File the resource's API usage is reported under
    pub canonical_file: Option<FileId>,
    pub entry_points: Vec<EntryPoint>,
    pub failures: Vec<(Option<CrudVerb>, TraceFailure)>,
}

impl TracedEntry {
    /// Union of the files spanned by all entry points
    pub fn files(&self) -> BTreeSet<FileId> {
        self.entry_points
            .iter()
            .flat_map(|e| e.files.iter().copied())
            .collect()
    }

    pub fn entry_point(&self, verb: CrudVerb) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|e| e.verb == verb)
    }
}

enum Delegation<'p> {
    Terminal,
    Follow(Callee<'p>),
    Ambiguous(Vec<String>),
}

struct Failure {
    reason: TraceFailure,
    file: FileId,
}

pub struct EntryPointTracer<'p> {
    program: &'p Program,
    max_depth: usize,
}

impl<'p> EntryPointTracer<'p> {
    pub fn new(program: &'p Program, config: &AnalyzerConfig) -> Self {
        Self {
            program,
            max_depth: config.max_trace_depth,
        }
    }

    pub fn trace(&self, module: &str, entry: &RegistrationEntry) -> TracedEntry {
        match &entry.implementation {
            Implementation::Constructor(symbol) => self.trace_constructor(module, entry, symbol),
            Implementation::Typed(symbol) => self.trace_typed(module, entry, symbol),
        }
    }

    fn trace_constructor(
        &self,
        module: &str,
        entry: &RegistrationEntry,
        symbol: &SymbolRef,
    ) -> TracedEntry {
        let mut traced = TracedEntry::default();
        let Some(decl) = self.program.func_decl(&symbol.package, &symbol.name) else {
            self.skip(module, entry, None, entry.declared_in, TraceFailure::MissingImplementation, &mut traced);
            return traced;
        };
        traced.canonical_file = Some(decl.location.file);

        let mut files = BTreeSet::new();
        let mut current = Callee {
            package: self.program.package_path_of(decl.location.file),
            decl,
        };
        let mut depth = 0;

        loop {
            let file = current.decl.location.file;
            files.insert(file);
            let Some(node) = self.program.decl_node(&current.decl.location) else {
                self.skip(module, entry, None, file, TraceFailure::MissingImplementation, &mut traced);
                return traced;
            };

            let mut scope = Scope::for_function(self.program, file, node);
            if let Some(literal) = resource_definition(node, &self.program.file(file).source) {
                self.trace_definition(module, entry, &scope, literal, &files, &mut traced);
                return traced;
            }

            match self.delegation(&mut scope, node) {
                Delegation::Terminal => {
                    self.skip(module, entry, None, file, TraceFailure::NoResourceDefinition, &mut traced);
                    return traced;
                }
                Delegation::Ambiguous(candidates) => {
                    self.skip(module, entry, None, file, TraceFailure::Ambiguous { candidates }, &mut traced);
                    return traced;
                }
                Delegation::Follow(next) => {
                    depth += 1;
                    if depth > self.max_depth {
                        self.skip(module, entry, None, file, TraceFailure::DepthExceeded, &mut traced);
                        return traced;
                    }
                    current = next;
                }
            }
        }
    }

    fn trace_definition(
        &self,
        module: &str,
        entry: &RegistrationEntry,
        scope: &Scope<'p>,
        literal: Node<'_>,
        base_files: &BTreeSet<FileId>,
        traced: &mut TracedEntry,
    ) {
        let file = scope.file().id;
        for (key, value) in syntax::keyed_elements(literal) {
            let Some(verb) = CrudVerb::from_field(scope.text(key)) else {
                continue;
            };
            if !entry.kind.verbs().contains(&verb) || traced.entry_point(verb).is_some() {
                continue;
            }

            let mut files = base_files.clone();
            let value = syntax::strip_address_of(value);
            let result = match value.kind() {
                "func_literal" => Ok(EntryFunction::Literal {
                    file,
                    line: syntax::line(value),
                }),
                // factory returning the implementation
                "call_expression" => match scope.resolve_callee(value) {
                    Some(factory) => self.unwrap(factory, &mut files).map(declared),
                    None => Err(Failure {
                        reason: TraceFailure::MissingImplementation,
                        file,
                    }),
                },
                _ => match function_value(scope, value) {
                    Some(function) => self.unwrap(function, &mut files).map(declared),
                    None => Err(Failure {
                        reason: TraceFailure::MissingImplementation,
                        file,
                    }),
                },
            };
            self.record(module, entry, verb, result, files, traced);
        }
    }

    fn trace_typed(&self, module: &str, entry: &RegistrationEntry, symbol: &SymbolRef) -> TracedEntry {
        let mut traced = TracedEntry::default();
        let Some(type_decl) = self.program.type_decl(&symbol.package, &symbol.name) else {
            self.skip(module, entry, None, entry.declared_in, TraceFailure::MissingImplementation, &mut traced);
            return traced;
        };
        let canonical = type_decl.location.file;
        traced.canonical_file = Some(canonical);

        let ty = GoType::named(symbol.package.as_str(), symbol.name.as_str());
        for &verb in entry.kind.verbs() {
            let Some(target) = self.program.find_method(&ty, verb.as_str()) else {
                self.skip(module, entry, Some(verb), canonical, TraceFailure::MissingImplementation, &mut traced);
                continue;
            };

            let mut files = BTreeSet::from([canonical]);
            let start = Callee {
                package: target.package,
                decl: target.decl,
            };
            let result = self.unwrap(start, &mut files).map(declared);
            self.record(module, entry, verb, result, files, &mut traced);
        }
        traced
    }

    /// Follow delegating wrappers from `start` until a terminal function
    fn unwrap(&self, start: Callee<'p>, files: &mut BTreeSet<FileId>) -> Result<Callee<'p>, Failure> {
        let mut current = start;
        let mut depth = 0;
        loop {
            let file = current.decl.location.file;
            files.insert(file);
            let Some(node) = self.program.decl_node(&current.decl.location) else {
                return Ok(current);
            };

            let mut scope = Scope::for_function(self.program, file, node);
            match self.delegation(&mut scope, node) {
                Delegation::Terminal => return Ok(current),
                Delegation::Ambiguous(candidates) => {
                    return Err(Failure {
                        reason: TraceFailure::Ambiguous { candidates },
                        file,
                    })
                }
                Delegation::Follow(next) => {
                    depth += 1;
                    if depth > self.max_depth {
                        return Err(Failure {
                            reason: TraceFailure::DepthExceeded,
                            file,
                        });
                    }
                    current = next;
                }
            }
        }
    }

    fn delegation(&self, scope: &mut Scope<'p>, func: Node<'_>) -> Delegation<'p> {
        let Some(body) = func.child_by_field_name("body") else {
            return Delegation::Terminal;
        };
        let statements = syntax::block_statements(body);
        let mut calls = Vec::new();
        if statements.is_empty() || !returned_calls(scope, &statements, &mut calls) {
            return Delegation::Terminal;
        }

        let mut candidates: Vec<Callee<'p>> = Vec::new();
        for call in calls {
            let Some(callee) = scope.resolve_callee(call) else {
                continue;
            };
            if self.program.is_vendored(callee.package) {
                continue;
            }
            if !candidates
                .iter()
                .any(|c| c.decl.location == callee.decl.location)
            {
                candidates.push(callee);
            }
        }

        match candidates.len() {
            0 => Delegation::Terminal,
            1 => Delegation::Follow(candidates[0]),
            _ => Delegation::Ambiguous(candidates.iter().map(|c| c.decl.qualified_name()).collect()),
        }
    }

    fn record(
        &self,
        module: &str,
        entry: &RegistrationEntry,
        verb: CrudVerb,
        result: Result<EntryFunction, Failure>,
        files: BTreeSet<FileId>,
        traced: &mut TracedEntry,
    ) {
        match result {
            Ok(function) => traced.entry_points.push(EntryPoint {
                resource_type: entry.resource_type.clone(),
                kind: entry.kind,
                verb,
                function,
                files,
            }),
            Err(failure) => self.skip(module, entry, Some(verb), failure.file, failure.reason, traced),
        }
    }

    fn skip(
        &self,
        module: &str,
        entry: &RegistrationEntry,
        verb: Option<CrudVerb>,
        file: FileId,
        reason: TraceFailure,
        traced: &mut TracedEntry,
    ) {
        debug!(
            module,
            resource = %entry.resource_type,
            kind = %entry.kind,
            verb = verb.map(CrudVerb::as_str).unwrap_or("*"),
            file = %self.program.file(file).relative_path.display(),
            reason = %reason,
            "Entry point not traced, skipping"
        );
        traced.failures.push((verb, reason));
    }
}

fn declared(callee: Callee<'_>) -> EntryFunction {
    EntryFunction::Declared {
        package: callee.package.to_string(),
        name: callee.decl.qualified_name(),
        location: callee.decl.location,
    }
}

/// `foo`, `pkg.Foo` or a method value `r.foo` used as a CRUD function
fn function_value<'p>(scope: &Scope<'p>, value: Node<'_>) -> Option<Callee<'p>> {
    let program = scope.program();
    match value.kind() {
        "identifier" => {
            let decl = program.func_decl(scope.package(), scope.text(value))?;
            Some(Callee {
                package: scope.package(),
                decl,
            })
        }
        "selector_expression" => {
            let operand = value.child_by_field_name("operand")?;
            let field = scope.text(value.child_by_field_name("field")?);
            if operand.kind() == "identifier" {
                if let Some(package) = scope.import_path(scope.text(operand)) {
                    let decl = program.func_decl(package, field)?;
                    return Some(Callee { package, decl });
                }
            }
            let target = program.find_method(&scope.type_of(operand)?, field)?;
            Some(Callee {
                package: target.package,
                decl: target.decl,
            })
        }
        _ => None,
    }
}

/// Calls returned by a delegating wrapper, or `false` when the statements
/// do anything other than return a single call
fn returned_calls<'t>(scope: &mut Scope<'_>, statements: &[Node<'t>], out: &mut Vec<Node<'t>>) -> bool {
    for statement in statements {
        match statement.kind() {
            "return_statement" => match syntax::return_values(*statement).as_slice() {
                [value] if syntax::strip_address_of(*value).kind() == "call_expression" => {
                    out.push(syntax::strip_address_of(*value));
                }
                _ => return false,
            },
            "if_statement" => {
                if let Some(initializer) = statement.child_by_field_name("initializer") {
                    scope.observe(initializer);
                }
                let Some(consequence) = statement.child_by_field_name("consequence") else {
                    return false;
                };
                if !returned_calls(scope, &syntax::block_statements(consequence), out) {
                    return false;
                }
                if let Some(alternative) = statement.child_by_field_name("alternative") {
                    let branch = if alternative.kind() == "if_statement" {
                        vec![alternative]
                    } else {
                        syntax::block_statements(alternative)
                    };
                    if !returned_calls(scope, &branch, out) {
                        return false;
                    }
                }
            }
            _ => return false,
        }
    }
    true
}

/// The `Resource{...}` literal with CRUD keys built by a constructor
fn resource_definition<'t>(func: Node<'t>, source: &str) -> Option<Node<'t>> {
    let body = func.child_by_field_name("body")?;
    syntax::find_descendants(body, true, &|node| {
        node.kind() == "composite_literal"
            && literal_base_name(node, source) == Some("Resource")
            && syntax::keyed_elements(node)
                .iter()
                .any(|(key, _)| CrudVerb::from_field(syntax::text(*key, source)).is_some())
    })
    .into_iter()
    .next()
}

fn literal_base_name<'s>(literal: Node<'_>, source: &'s str) -> Option<&'s str> {
    let mut ty = literal.child_by_field_name("type")?;
    if ty.kind() == "generic_type" {
        ty = ty.child_by_field_name("type")?;
    }
    match ty.kind() {
        "qualified_type" => Some(syntax::text(ty.child_by_field_name("name")?, source)),
        "type_identifier" => Some(syntax::text(ty, source)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{provider, write, MODULE};
    use std::path::Path;
    use tracing_test::traced_test;

    fn network_provider() -> tempfile::TempDir {
        let temp = provider();
        let root = temp.path();
        write(
            root,
            "internal/services/network/virtual_hub_resource.go",
            r#"package network

import "example.com/provider/internal/tf/pluginsdk"

func resourceVirtualHub() *pluginsdk.Resource {
	return &pluginsdk.Resource{
		Create: resourceVirtualHubCreate,
		Read:   resourceVirtualHubRead,
		Delete: func(d *pluginsdk.ResourceData, meta interface{}) error {
			return nil
		},

		Timeouts: &pluginsdk.ResourceTimeout{
			Create: 30,
		},
	}
}

func resourceVirtualHubCreate(d *pluginsdk.ResourceData, meta interface{}) error {
	_ = d.Id()
	return resourceVirtualHubRead(d, meta)
}

func resourceVirtualHubRead(d *pluginsdk.ResourceData, meta interface{}) error {
	return nil
}
"#,
        );
        write(
            root,
            "internal/services/network/route_table_resource.go",
            r#"package network

import "example.com/provider/internal/tf/pluginsdk"

func resourceRouteTable() *pluginsdk.Resource {
	return resourceRouteTableSchema()
}
"#,
        );
        write(
            root,
            "internal/services/network/route_table_schema.go",
            r#"package network

import "example.com/provider/internal/tf/pluginsdk"

func resourceRouteTableSchema() *pluginsdk.Resource {
	return &pluginsdk.Resource{
		Read: resourceRouteTableRead,
	}
}

func resourceRouteTableRead(d *pluginsdk.ResourceData, meta interface{}) error {
	return nil
}
"#,
        );
        write(
            root,
            "internal/services/network/feature_flagged_resource.go",
            r#"package network

import "example.com/provider/internal/tf/pluginsdk"

func fourPointOh() bool {
	return true
}

func resourceFeatureFlagged() *pluginsdk.Resource {
	if fourPointOh() {
		return resourceFeatureFlaggedV4()
	}
	return resourceFeatureFlaggedV3()
}

func resourceFeatureFlaggedV4() *pluginsdk.Resource {
	return &pluginsdk.Resource{Read: resourceVirtualHubRead}
}

func resourceFeatureFlaggedV3() *pluginsdk.Resource {
	return &pluginsdk.Resource{Read: resourceVirtualHubRead}
}
"#,
        );
        temp
    }

    fn constructor_entry(program: &Program, file: &str, name: &str, constructor: &str) -> RegistrationEntry {
        RegistrationEntry {
            resource_type: name.to_string(),
            kind: ResourceKind::Resource,
            implementation: Implementation::Constructor(SymbolRef::new(
                format!("{MODULE}/internal/services/network"),
                constructor,
            )),
            declared_in: program.file_at(file).unwrap().id,
        }
    }

    fn path_of(program: &Program, id: FileId) -> &Path {
        &program.file(id).relative_path
    }

    #[test]
    fn test_constructor_with_inline_and_named_functions() {
        let temp = network_provider();
        let program = Program::load(temp.path(), &AnalyzerConfig::default()).unwrap();
        let tracer = EntryPointTracer::new(&program, &AnalyzerConfig::default());

        let entry = constructor_entry(
            &program,
            "internal/services/network/virtual_hub_resource.go",
            "example_virtual_hub",
            "resourceVirtualHub",
        );
        let traced = tracer.trace("network", &entry);

        assert!(traced.failures.is_empty());
        assert_eq!(traced.entry_points.len(), 3);
        assert!(traced.entry_point(CrudVerb::Update).is_none());

        let create = traced.entry_point(CrudVerb::Create).unwrap();
        assert!(matches!(
            &create.function,
            EntryFunction::Declared { name, .. } if name == "resourceVirtualHubCreate"
        ));
        let delete = traced.entry_point(CrudVerb::Delete).unwrap();
        assert!(matches!(delete.function, EntryFunction::Literal { line: 9, .. }));
        assert_eq!(
            path_of(&program, traced.canonical_file.unwrap()),
            Path::new("internal/services/network/virtual_hub_resource.go")
        );
    }

    #[test]
    fn test_constructor_wrapper_records_both_files() {
        let temp = network_provider();
        let program = Program::load(temp.path(), &AnalyzerConfig::default()).unwrap();
        let tracer = EntryPointTracer::new(&program, &AnalyzerConfig::default());

        let entry = constructor_entry(
            &program,
            "internal/services/network/route_table_resource.go",
            "example_route_table",
            "resourceRouteTable",
        );
        let traced = tracer.trace("network", &entry);

        let read = traced.entry_point(CrudVerb::Read).unwrap();
        let files: Vec<_> = read.files.iter().map(|id| path_of(&program, *id)).collect();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&Path::new("internal/services/network/route_table_resource.go")));
        assert!(files.contains(&Path::new("internal/services/network/route_table_schema.go")));
        assert_eq!(
            path_of(&program, traced.canonical_file.unwrap()),
            Path::new("internal/services/network/route_table_resource.go")
        );
    }

    #[traced_test]
    #[test]
    fn test_ambiguous_delegation_is_skipped() {
        let temp = network_provider();
        let program = Program::load(temp.path(), &AnalyzerConfig::default()).unwrap();
        let tracer = EntryPointTracer::new(&program, &AnalyzerConfig::default());

        let entry = constructor_entry(
            &program,
            "internal/services/network/feature_flagged_resource.go",
            "example_feature_flagged",
            "resourceFeatureFlagged",
        );
        let traced = tracer.trace("network", &entry);

        assert!(traced.entry_points.is_empty());
        assert!(matches!(
            traced.failures.as_slice(),
            [(None, TraceFailure::Ambiguous { candidates })] if candidates.len() == 2
        ));
        logs_assert(|lines: &[&str]| {
            let skipped = lines
                .iter()
                .filter(|line| line.contains("DEBUG") && line.contains("ambiguous delegation"))
                .count();
            match skipped {
                1 => Ok(()),
                n => Err(format!("expected one ambiguous delegation line, found {n}")),
            }
        });
    }

    #[test]
    fn test_typed_verbs_follow_helpers() {
        let temp = provider();
        let root = temp.path();
        write(
            root,
            "internal/services/containerapps/container_app_environment_resource.go",
            r#"package containerapps

type ContainerAppEnvironmentResource struct{}

func (r ContainerAppEnvironmentResource) ResourceType() string {
	return "example_container_app_environment"
}

func (r ContainerAppEnvironmentResource) Create() sdk.ResourceFunc {
	return sdk.ResourceFunc{
		Func: func(ctx context.Context, metadata sdk.ResourceMetaData) error {
			return nil
		},
	}
}

func (r ContainerAppEnvironmentResource) Read() sdk.ResourceFunc {
	return sdk.ResourceFunc{}
}

func (r ContainerAppEnvironmentResource) Delete() sdk.ResourceFunc {
	return r.deleteFunc()
}
"#,
        );
        write(
            root,
            "internal/services/containerapps/container_app_environment_helpers.go",
            r#"package containerapps

func (r ContainerAppEnvironmentResource) deleteFunc() sdk.ResourceFunc {
	return sdk.ResourceFunc{}
}
"#,
        );

        let program = Program::load(root, &AnalyzerConfig::default()).unwrap();
        let tracer = EntryPointTracer::new(&program, &AnalyzerConfig::default());
        let resource_file = program
            .file_at("internal/services/containerapps/container_app_environment_resource.go")
            .unwrap()
            .id;

        let entry = RegistrationEntry {
            resource_type: "example_container_app_environment".to_string(),
            kind: ResourceKind::Resource,
            implementation: Implementation::Typed(SymbolRef::new(
                format!("{MODULE}/internal/services/containerapps"),
                "ContainerAppEnvironmentResource",
            )),
            declared_in: resource_file,
        };
        let traced = tracer.trace("containerapps", &entry);

        assert_eq!(traced.canonical_file, Some(resource_file));
        assert_eq!(traced.entry_points.len(), 3);
        assert_eq!(
            traced.failures,
            vec![(Some(CrudVerb::Update), TraceFailure::MissingImplementation)]
        );

        let delete = traced.entry_point(CrudVerb::Delete).unwrap();
        assert!(matches!(
            &delete.function,
            EntryFunction::Declared { name, .. } if name == "ContainerAppEnvironmentResource.deleteFunc"
        ));
        assert_eq!(delete.files.len(), 2);
        assert_eq!(traced.files().len(), 2);
    }

    #[test]
    fn test_delegation_depth_is_bounded() {
        let temp = provider();
        write(
            temp.path(),
            "internal/services/network/loop_resource.go",
            r#"package network

func resourceLoop() *pluginsdk.Resource {
	return resourceLoopAgain()
}

func resourceLoopAgain() *pluginsdk.Resource {
	return resourceLoop()
}
"#,
        );

        let program = Program::load(temp.path(), &AnalyzerConfig::default()).unwrap();
        let config = AnalyzerConfig {
            max_trace_depth: 3,
            ..Default::default()
        };
        let tracer = EntryPointTracer::new(&program, &config);

        let entry = constructor_entry(
            &program,
            "internal/services/network/loop_resource.go",
            "example_loop",
            "resourceLoop",
        );
        let traced = tracer.trace("network", &entry);

        assert!(traced.entry_points.is_empty());
        assert_eq!(traced.failures, vec![(None, TraceFailure::DepthExceeded)]);
    }
}
