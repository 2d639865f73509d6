//! Local type inference inside function bodies
//!
//! A [`Scope`] tracks the static types of parameters and locals as statements
//! are observed in source order. [`walk`] follows Go's lexical scoping: names
//! declared inside a block, clause or function literal are dropped when it
//! closes, so an outer binding shadowed there is visible again afterwards.

use crate::index::{parameters, var_specs, FuncDecl};
use crate::program::{FileId, Program, SourceFile};
use crate::syntax;
use crate::types::{resolve_type_expr, GoType};
use std::collections::HashMap;
use tree_sitter::Node;

/// The declaration a call expression statically dispatches to
#[derive(Debug, Clone, Copy)]
pub struct Callee<'p> {
    /// Import path of the declaring package
    pub package: &'p str,
    pub decl: &'p FuncDecl,
}

pub struct Scope<'p> {
    program: &'p Program,
    file: &'p SourceFile,
    package: &'p str,
    bindings: HashMap<String, GoType>,
}

impl<'p> Scope<'p> {
    pub fn new(program: &'p Program, file: FileId) -> Self {
        let file = program.file(file);
        let package = program.package(file.package).import_path.as_str();
        Self {
            program,
            file,
            package,
            bindings: HashMap::new(),
        }
    }

    /// Scope with a function's receiver and parameters bound
    pub fn for_function(program: &'p Program, file: FileId, func: Node<'_>) -> Self {
        let mut scope = Self::new(program, file);
        scope.bind_signature(func);
        scope
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn file(&self) -> &'p SourceFile {
        self.file
    }

    /// Import path of the package the scope's file belongs to
    pub fn package(&self) -> &'p str {
        self.package
    }

    pub fn text(&self, node: Node<'_>) -> &'p str {
        syntax::text(node, &self.file.source)
    }

    pub fn bind(&mut self, name: impl Into<String>, ty: GoType) {
        let name = name.into();
        if name != "_" {
            self.bindings.insert(name, ty);
        }
    }

    pub fn binding(&self, name: &str) -> Option<&GoType> {
        self.bindings.get(name)
    }

    /// Import path for a package identifier, unless a local shadows it
    pub fn import_path(&self, alias: &str) -> Option<&'p str> {
        if self.bindings.contains_key(alias) {
            return None;
        }
        self.file.imports.resolve(alias)
    }

    pub fn resolve_type(&self, node: Node<'_>) -> Option<GoType> {
        resolve_type_expr(node, &self.file.source, self.package, &self.file.imports)
    }

    /// Bind the receiver and parameters of a function, method or literal
    pub fn bind_signature(&mut self, func: Node<'_>) {
        for field in ["receiver", "parameters"] {
            let Some(list) = func.child_by_field_name(field) else {
                continue;
            };
            let params = parameters(list, &self.file.source, |n| self.resolve_type(n));
            for param in params {
                if let (Some(name), Some(ty)) = (param.name, param.ty) {
                    self.bind(name, ty);
                }
            }
        }
    }

    /// Static type of an expression, when it can be determined
    pub fn type_of(&self, expr: Node<'_>) -> Option<GoType> {
        match expr.kind() {
            "identifier" => {
                let name = self.text(expr);
                if let Some(ty) = self.bindings.get(name) {
                    return Some(ty.clone());
                }
                match name {
                    "nil" => None,
                    _ => self.program.package_var(self.package, name).cloned(),
                }
            }
            "true" | "false" => Some(GoType::Basic("bool".to_string())),
            "interpreted_string_literal" | "raw_string_literal" => {
                Some(GoType::Basic("string".to_string()))
            }
            "int_literal" => Some(GoType::Basic("int".to_string())),
            "selector_expression" => {
                let operand = expr.child_by_field_name("operand")?;
                let field = self.text(expr.child_by_field_name("field")?);
                if operand.kind() == "identifier" {
                    if let Some(path) = self.import_path(self.text(operand)) {
                        return self.program.package_var(path, field).cloned();
                    }
                }
                let ty = self.type_of(operand)?;
                self.program.field_type(&ty, field)
            }
            "call_expression" => self.call_results(expr).into_iter().next(),
            "type_assertion_expression" | "composite_literal" => {
                self.resolve_type(expr.child_by_field_name("type")?)
            }
            "unary_expression" => {
                let operator = expr.child_by_field_name("operator")?;
                let operand = self.type_of(expr.child_by_field_name("operand")?)?;
                match operator.kind() {
                    "&" => Some(GoType::pointer(operand)),
                    "*" => match operand {
                        GoType::Pointer(inner) => Some(*inner),
                        _ => None,
                    },
                    _ => Some(operand),
                }
            }
            "parenthesized_expression" => self.type_of(expr.named_child(0)?),
            "index_expression" => self.type_of(expr.child_by_field_name("operand")?)?.index_type(),
            "func_literal" => Some(GoType::Func),
            _ => None,
        }
    }

    /// Result types of a call, including conversions and builtins
    pub fn call_results(&self, call: Node<'_>) -> Vec<GoType> {
        let Some(function) = call.child_by_field_name("function") else {
            return Vec::new();
        };

        match function.kind() {
            "identifier" => {
                let name = self.text(function);
                if self.bindings.contains_key(name) {
                    return Vec::new();
                }
                match name {
                    "new" => {
                        return self
                            .first_argument_type(call)
                            .map(|ty| vec![GoType::pointer(ty)])
                            .unwrap_or_default()
                    }
                    "make" => return self.first_argument_type(call).into_iter().collect(),
                    _ => {}
                }
                if let Some(func) = self.program.func_decl(self.package, name) {
                    return func.results.clone();
                }
                if self.program.type_decl(self.package, name).is_some() {
                    return vec![GoType::named(self.package, name)];
                }
                match self.resolve_type(function) {
                    Some(basic @ GoType::Basic(_)) => vec![basic],
                    _ => Vec::new(),
                }
            }
            "selector_expression" => {
                let (Some(operand), Some(field)) = (
                    function.child_by_field_name("operand"),
                    function.child_by_field_name("field"),
                ) else {
                    return Vec::new();
                };
                let field = self.text(field);

                if operand.kind() == "identifier" {
                    if let Some(path) = self.import_path(self.text(operand)) {
                        if let Some(func) = self.program.func_decl(path, field) {
                            return func.results.clone();
                        }
                        if self.program.type_decl(path, field).is_some() {
                            return vec![GoType::named(path, field)];
                        }
                        return Vec::new();
                    }
                }

                self.type_of(operand)
                    .and_then(|ty| self.program.find_method(&ty, field))
                    .map(|target| target.decl.results.clone())
                    .unwrap_or_default()
            }
            // `(*T)(x)` and similar conversions
            "parenthesized_expression" => function
                .named_child(0)
                .and_then(|inner| self.resolve_type(inner))
                .into_iter()
                .collect(),
            "func_literal" => function
                .child_by_field_name("result")
                .and_then(|result| self.resolve_type(result))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn first_argument_type(&self, call: Node<'_>) -> Option<GoType> {
        let argument = syntax::call_arguments(call).into_iter().next()?;
        self.resolve_type(argument)
    }

    /// The function or method a call dispatches to, when it is declared in a loaded package
    pub fn resolve_callee(&self, call: Node<'_>) -> Option<Callee<'p>> {
        let function = call.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => {
                let name = self.text(function);
                if self.bindings.contains_key(name) {
                    return None;
                }
                let decl = self.program.func_decl(self.package, name)?;
                Some(Callee {
                    package: self.package,
                    decl,
                })
            }
            "selector_expression" => {
                let operand = function.child_by_field_name("operand")?;
                let field = self.text(function.child_by_field_name("field")?);

                if operand.kind() == "identifier" {
                    if let Some(path) = self.import_path(self.text(operand)) {
                        let decl = self.program.func_decl(path, field)?;
                        return Some(Callee {
                            package: path,
                            decl,
                        });
                    }
                }

                let ty = self.type_of(operand)?;
                let target = self.program.find_method(&ty, field)?;
                Some(Callee {
                    package: target.package,
                    decl: target.decl,
                })
            }
            _ => None,
        }
    }

    /// Record the bindings introduced by a statement or clause
    pub fn observe(&mut self, node: Node<'_>) {
        match node.kind() {
            "short_var_declaration" => {
                if let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) {
                    self.bind_assignment(syntax::expressions(left), syntax::expressions(right), false);
                }
            }
            "assignment_statement" => {
                let plain = node
                    .child_by_field_name("operator")
                    .map(|op| op.kind() == "=")
                    .unwrap_or(false);
                if let (true, Some(left), Some(right)) = (
                    plain,
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) {
                    self.bind_assignment(syntax::expressions(left), syntax::expressions(right), true);
                }
            }
            "var_declaration" => {
                for spec in var_specs(node) {
                    let names = syntax::field_children(spec, "name");
                    if let Some(ty) = spec
                        .child_by_field_name("type")
                        .and_then(|t| self.resolve_type(t))
                    {
                        for name in names {
                            self.bind(self.text(name), ty.clone());
                        }
                    } else if let Some(value) = spec.child_by_field_name("value") {
                        self.bind_assignment(names, syntax::expressions(value), false);
                    }
                }
            }
            "range_clause" => {
                let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) else {
                    return;
                };
                let Some((key, value)) = self.type_of(right).and_then(|ty| ty.range_types())
                else {
                    return;
                };
                let names = syntax::expressions(left);
                for (name, ty) in names.into_iter().zip([key, value]) {
                    if name.kind() == "identifier" {
                        self.bind(self.text(name), ty);
                    }
                }
            }
            _ => {}
        }
    }

    fn bind_assignment(&mut self, names: Vec<Node<'_>>, values: Vec<Node<'_>>, only_unbound: bool) {
        let types: Vec<Option<GoType>> = match values.as_slice() {
            [call] if names.len() > 1 && call.kind() == "call_expression" => {
                self.call_results(*call).into_iter().map(Some).collect()
            }
            // comma-ok forms: `v, ok := m[k]`, `v, ok := x.(T)`
            [value] if names.len() > 1 => vec![self.type_of(*value)],
            _ => values.iter().map(|v| self.type_of(*v)).collect(),
        };

        for (name, ty) in names.into_iter().zip(types) {
            if name.kind() != "identifier" {
                continue;
            }
            let name = self.text(name);
            if only_unbound && self.bindings.contains_key(name) {
                continue;
            }
            if let Some(ty) = ty {
                self.bind(name, ty);
            }
        }
    }
}

/// Visit `node` and its descendants in pre-order, updating `scope` as
/// declarations are passed so each visit sees the bindings in effect
pub fn walk<'p, 't>(
    scope: &mut Scope<'p>,
    node: Node<'t>,
    visit: &mut dyn FnMut(&Scope<'p>, Node<'t>),
) {
    visit(&*scope, node);
    let enclosing = opens_scope(node.kind()).then(|| scope.bindings.clone());
    if node.kind() == "func_literal" {
        scope.bind_signature(node);
    }
    for child in syntax::named_children(node) {
        walk(scope, child, visit);
    }
    match enclosing {
        Some(bindings) => scope.bindings = bindings,
        None => scope.observe(node),
    }
}

/// Nodes whose declarations are local to them
fn opens_scope(kind: &str) -> bool {
    matches!(
        kind,
        "block"
            | "func_literal"
            | "if_statement"
            | "for_statement"
            | "expression_switch_statement"
            | "type_switch_statement"
            | "select_statement"
            | "expression_case"
            | "type_case"
            | "default_case"
            | "communication_case"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiscan_common::AnalyzerConfig;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const HUBS: &str = "example.com/sdk/hubs";

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn program() -> (TempDir, Program) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "go.mod", "module example.com/provider\n");
        write(
            root,
            "internal/clients/client.go",
            r#"package clients

import network "example.com/provider/internal/services/network/client"

type Client struct {
	Network *network.Client
}
"#,
        );
        write(
            root,
            "internal/services/network/client/client.go",
            r#"package client

import "example.com/sdk/hubs"

type Client struct {
	HubsClient *hubs.HubsClient
}
"#,
        );
        write(
            root,
            "internal/services/network/hub_resource.go",
            r#"package network

import (
	"example.com/provider/internal/clients"
	"example.com/sdk/hubs"
)

func resourceHubRead(d *Data, meta interface{}) error {
	client := meta.(*clients.Client).Network.HubsClient
	id, err := hubs.ParseHubID(d.Id())
	if err != nil {
		var client hubs.HubId
		_ = client.Name
		return err
	}

	resp, err := client.Get(ctx, *id)
	for _, route := range resp.Routes {
		_ = route.Name
	}

	go func(hubs string) {
		hubs.Shadowed()
	}("x")

	_, _ = hubs.ParseHubID("y")
	return nil
}
"#,
        );
        write(
            root,
            "vendor/example.com/sdk/hubs/client.go",
            r#"package hubs

type HubId struct {
	Name string
}

func ParseHubID(input string) (*HubId, error) {
	return nil, nil
}

type HubsClient struct{}

type GetResult struct {
	Routes []Route
}

type Route struct {
	Name string
}

func (c HubsClient) Get(ctx string, id HubId) (result GetResult, err error) {
	return
}
"#,
        );

        let program = Program::load(root, &AnalyzerConfig::default()).unwrap();
        (temp, program)
    }

    #[test]
    fn test_walk_infers_locals_and_resolves_calls() {
        let (_temp, program) = program();
        let func = program
            .func_decl("example.com/provider/internal/services/network", "resourceHubRead")
            .unwrap();
        let node = program.decl_node(&func.location).unwrap();
        let body = node.child_by_field_name("body").unwrap();

        let mut scope = Scope::for_function(&program, func.location.file, node);
        assert!(scope.binding("meta").is_some());

        let mut calls = Vec::new();
        let mut at_get = None;
        let mut route = None;
        walk(&mut scope, body, &mut |scope, node| {
            if node.kind() == "call_expression" {
                if let Some(callee) = scope.resolve_callee(node) {
                    let name = callee.decl.qualified_name();
                    if name == "HubsClient.Get" {
                        at_get = Some((scope.binding("client").cloned(), scope.binding("id").cloned()));
                    }
                    calls.push((callee.package.to_string(), name));
                }
            }
            if node.kind() == "selector_expression" && scope.text(node) == "route.Name" {
                route = scope.binding("route").cloned();
            }
        });

        assert_eq!(
            calls,
            vec![
                (HUBS.to_string(), "ParseHubID".to_string()),
                (HUBS.to_string(), "HubsClient.Get".to_string()),
                (HUBS.to_string(), "ParseHubID".to_string()),
            ]
        );
        assert_eq!(
            at_get,
            Some((
                Some(GoType::pointer(GoType::named(HUBS, "HubsClient"))),
                Some(GoType::pointer(GoType::named(HUBS, "HubId"))),
            ))
        );
        assert_eq!(route, Some(GoType::named(HUBS, "Route")));

        // Locals of the body are gone once it closes, parameters stay
        assert_eq!(scope.binding("route"), None);
        assert_eq!(scope.binding("client"), None);
        assert!(scope.binding("meta").is_some());
    }

    #[test]
    fn test_inner_declarations_do_not_leak() {
        let (_temp, program) = program();
        let func = program
            .func_decl("example.com/provider/internal/services/network", "resourceHubRead")
            .unwrap();
        let node = program.decl_node(&func.location).unwrap();
        let body = node.child_by_field_name("body").unwrap();

        let mut clients = Vec::new();
        let mut shadowed_call = None;
        let mut scope = Scope::for_function(&program, func.location.file, node);
        walk(&mut scope, body, &mut |scope, node| {
            if node.kind() != "call_expression" {
                return;
            }
            match scope.text(node) {
                text if text.starts_with("client.Get") => {
                    clients.push(scope.binding("client").cloned());
                }
                "hubs.Shadowed()" => {
                    shadowed_call = Some((scope.import_path("hubs"), scope.resolve_callee(node).is_some()));
                }
                text if text.starts_with("hubs.ParseHubID(\"y\")") => {
                    clients.push(scope.binding("hubs").cloned());
                }
                _ => {}
            }
        });

        // `var client hubs.HubId` in the `if` body does not shadow the outer client
        assert_eq!(
            clients,
            vec![Some(GoType::pointer(GoType::named(HUBS, "HubsClient"))), None]
        );
        // The literal's `hubs` parameter hides the import only inside the literal
        assert_eq!(shadowed_call, Some((None, false)));
    }

    #[test]
    fn test_locals_shadow_imports() {
        let (_temp, program) = program();
        let file = program
            .file_at("internal/services/network/hub_resource.go")
            .unwrap();

        let mut scope = Scope::new(&program, file.id);
        assert_eq!(scope.import_path("hubs"), Some(HUBS));

        scope.bind("hubs", GoType::Basic("string".to_string()));
        assert_eq!(scope.import_path("hubs"), None);
    }
}
