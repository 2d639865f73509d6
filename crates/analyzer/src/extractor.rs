//! Request path extraction from SDK method bodies

use crate::collector::CallSite;
use apiscan_common::AnalyzerConfig;
use apiscan_parser::{syntax, walk, DeclLocation, Program, Scope};
use serde::Serialize;
use tree_sitter::Node;

/// How a template was recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    /// A string literal assigned to the path directly
    Literal,
    /// `id.ID()` style accessor whose body yields the template
    Accessor,
    /// `fmt.Sprintf` over nested templates
    Formatted,
}

/// A request path template such as
/// `/subscriptions/%s/resourceGroups/%s/providers/Microsoft.Network/virtualHubs/%s`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiPathTemplate {
    pub text: String,
    pub source: TemplateSource,
}

pub struct ApiPathExtractor<'p> {
    program: &'p Program,
    max_depth: usize,
}

impl<'p> ApiPathExtractor<'p> {
    pub fn new(program: &'p Program, config: &AnalyzerConfig) -> Self {
        Self {
            program,
            max_depth: config.max_trace_depth,
        }
    }

    pub fn extract(&self, site: &CallSite) -> Option<ApiPathTemplate> {
        self.extract_from(&site.declaration)
    }

    /// Template of the request path built by the method declared at `location`
    pub fn extract_from(&self, location: &DeclLocation) -> Option<ApiPathTemplate> {
        self.extract_at(location, 0)
    }

    fn extract_at(&self, location: &DeclLocation, depth: usize) -> Option<ApiPathTemplate> {
        if depth > self.max_depth {
            return None;
        }
        let node = self.program.decl_node(location)?;
        let body = node.child_by_field_name("body")?;

        let mut found = None;
        let mut scope = Scope::for_function(self.program, location.file, node);
        walk(&mut scope, body, &mut |scope, node| {
            if found.is_none() {
                if let Some(value) = path_value(scope, node) {
                    found = self.resolve_value(scope, value, depth);
                }
            }
        });
        if found.is_some() {
            return found;
        }

        // Operations such as `CreateOrUpdateThenPoll` delegate to a sibling method
        let receiver = receiver_name(node, &self.program.file(location.file).source)?;
        let mut delegates = Vec::new();
        let mut scope = Scope::for_function(self.program, location.file, node);
        walk(&mut scope, body, &mut |scope, node| {
            if node.kind() != "call_expression" || !calls_on(scope, node, receiver) {
                return;
            }
            if let Some(callee) = scope.resolve_callee(node) {
                if callee.decl.location != *location {
                    delegates.push(callee.decl.location);
                }
            }
        });

        delegates
            .iter()
            .find_map(|delegate| self.extract_at(delegate, depth + 1))
    }

    fn resolve_value(&self, scope: &Scope<'_>, value: Node<'_>, depth: usize) -> Option<ApiPathTemplate> {
        if depth > self.max_depth {
            return None;
        }
        let value = syntax::strip_address_of(value);
        match value.kind() {
            "interpreted_string_literal" | "raw_string_literal" => Some(ApiPathTemplate {
                text: syntax::string_literal(value, &scope.file().source)?,
                source: TemplateSource::Literal,
            }),
            "call_expression" if is_sprintf(scope, value) => self.resolve_format(scope, value, depth),
            "call_expression" => self.resolve_accessor(scope, value, depth),
            _ => None,
        }
    }

    fn resolve_accessor(&self, scope: &Scope<'_>, call: Node<'_>, depth: usize) -> Option<ApiPathTemplate> {
        if !syntax::call_arguments(call).is_empty() {
            return None;
        }
        let function = call.child_by_field_name("function")?;
        if function.kind() != "selector_expression" {
            return None;
        }
        let operand = function.child_by_field_name("operand")?;
        let method = scope.text(function.child_by_field_name("field")?);

        let ty = scope.type_of(operand)?;
        let target = self.program.find_method(&ty, method)?;
        let text = self.accessor_template(&target.decl.location, depth + 1)?;
        Some(ApiPathTemplate {
            text,
            source: TemplateSource::Accessor,
        })
    }

    /// Template produced by the first statement of an accessor method
    fn accessor_template(&self, location: &DeclLocation, depth: usize) -> Option<String> {
        if depth > self.max_depth {
            return None;
        }
        let node = self.program.decl_node(location)?;
        let first = syntax::block_statements(node.child_by_field_name("body")?)
            .into_iter()
            .next()?;
        let source = &self.program.file(location.file).source;

        match first.kind() {
            "short_var_declaration" | "assignment_statement" => {
                let right = first.child_by_field_name("right")?;
                let value = syntax::expressions(right).into_iter().next()?;
                syntax::string_literal(value, source)
            }
            "var_declaration" => {
                let literal = syntax::find_descendants(first, true, &|n| {
                    matches!(n.kind(), "interpreted_string_literal" | "raw_string_literal")
                })
                .into_iter()
                .next()?;
                syntax::string_literal(literal, source)
            }
            "return_statement" => {
                let value = syntax::return_values(first).into_iter().next()?;
                let scope = Scope::for_function(self.program, location.file, node);
                self.resolve_value(&scope, value, depth).map(|t| t.text)
            }
            _ => None,
        }
    }

    fn resolve_format(&self, scope: &Scope<'_>, call: Node<'_>, depth: usize) -> Option<ApiPathTemplate> {
        let arguments = syntax::call_arguments(call);
        let (format, rest) = arguments.split_first()?;
        let format = syntax::string_literal(*format, &scope.file().source)?;

        let values: Vec<Option<String>> = rest
            .iter()
            .map(|argument| {
                let argument = syntax::strip_address_of(*argument);
                if argument.kind() != "call_expression" {
                    return None;
                }
                self.resolve_value(scope, argument, depth + 1)
                    .map(|t| t.text)
            })
            .collect();

        Some(ApiPathTemplate {
            text: substitute_verbs(&format, &values),
            source: TemplateSource::Formatted,
        })
    }
}

/// Value assigned to a request `Path`, via `Path: v` or `x.Path = v`
fn path_value<'t>(scope: &Scope<'_>, node: Node<'t>) -> Option<Node<'t>> {
    match node.kind() {
        "composite_literal" => syntax::keyed_elements(node)
            .into_iter()
            .find(|(key, _)| scope.text(*key) == "Path")
            .map(|(_, value)| value),
        "assignment_statement" => {
            let left = syntax::expressions(node.child_by_field_name("left")?);
            let [target] = left.as_slice() else {
                return None;
            };
            let field = target.child_by_field_name("field");
            if target.kind() != "selector_expression" || field.map(|f| scope.text(f)) != Some("Path") {
                return None;
            }
            syntax::expressions(node.child_by_field_name("right")?)
                .into_iter()
                .next()
        }
        _ => None,
    }
}

fn is_sprintf(scope: &Scope<'_>, call: Node<'_>) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    let (Some(operand), Some(field)) = (
        function.child_by_field_name("operand"),
        function.child_by_field_name("field"),
    ) else {
        return false;
    };
    operand.kind() == "identifier"
        && scope.import_path(scope.text(operand)) == Some("fmt")
        && scope.text(field) == "Sprintf"
}

fn calls_on(scope: &Scope<'_>, call: Node<'_>, receiver: &str) -> bool {
    call.child_by_field_name("function")
        .filter(|f| f.kind() == "selector_expression")
        .and_then(|f| f.child_by_field_name("operand"))
        .map(|operand| operand.kind() == "identifier" && scope.text(operand) == receiver)
        .unwrap_or(false)
}

fn receiver_name<'s>(func: Node<'_>, source: &'s str) -> Option<&'s str> {
    let list = func.child_by_field_name("receiver")?;
    let parameter = syntax::named_children(list).into_iter().next()?;
    Some(syntax::text(parameter.child_by_field_name("name")?, source))
}

/// Replace the `%` verbs of a format string with resolved values in order
///
/// `%%` is kept verbatim and does not consume a value. Verbs without a
/// resolved value are left in place.
pub fn substitute_verbs(format: &str, values: &[Option<String>]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.char_indices().peekable();
    let mut next = 0;

    while let Some((start, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if let Some((_, '%')) = chars.peek() {
            chars.next();
            out.push_str("%%");
            continue;
        }

        let mut end = format.len();
        for (i, ch) in chars.by_ref() {
            if ch.is_ascii_alphabetic() {
                end = i + ch.len_utf8();
                break;
            }
        }

        match values.get(next) {
            Some(Some(value)) => out.push_str(value),
            _ => out.push_str(&format[start..end]),
        }
        next += 1;
    }
    out
}
