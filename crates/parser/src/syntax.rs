//! Small helpers over tree-sitter-go nodes

use tree_sitter::Node;

/// Source text of a node
pub fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Named children of a node, comments excluded
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// All children attached to a field (e.g. every `name` of `a, b int`)
pub fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// 1-based line of a node
pub fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// Unquoted value of an interpreted or raw string literal
pub fn string_literal(node: Node<'_>, source: &str) -> Option<String> {
    let raw = text(node, source);
    match node.kind() {
        "raw_string_literal" => raw
            .strip_prefix('`')
            .and_then(|s| s.strip_suffix('`'))
            .map(str::to_string),
        "interpreted_string_literal" => raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(unescape),
        _ => None,
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Statements of a block, flattening the grammar's `statement_list` wrapper
pub fn block_statements<'t>(block: Node<'t>) -> Vec<Node<'t>> {
    let mut statements = Vec::new();
    for child in named_children(block) {
        if child.kind() == "statement_list" {
            statements.extend(named_children(child));
        } else {
            statements.push(child);
        }
    }
    statements
}

/// Expressions of an `expression_list`, or the node itself
pub fn expressions<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    if node.kind() == "expression_list" {
        named_children(node)
    } else {
        vec![node]
    }
}

/// Values returned by a `return` statement
pub fn return_values<'t>(statement: Node<'t>) -> Vec<Node<'t>> {
    named_children(statement)
        .into_iter()
        .flat_map(expressions)
        .collect()
}

/// Arguments of a call expression
pub fn call_arguments<'t>(call: Node<'t>) -> Vec<Node<'t>> {
    call.child_by_field_name("arguments")
        .map(named_children)
        .unwrap_or_default()
}

/// Strip the `literal_element` wrapper used inside composite literals
pub fn literal_element(node: Node<'_>) -> Node<'_> {
    if node.kind() == "literal_element" {
        node.named_child(0).unwrap_or(node)
    } else {
        node
    }
}

/// `(key, value)` pairs of a composite literal
pub fn keyed_elements<'t>(literal: Node<'t>) -> Vec<(Node<'t>, Node<'t>)> {
    let Some(body) = literal.child_by_field_name("body") else {
        return Vec::new();
    };

    named_children(body)
        .into_iter()
        .filter(|element| element.kind() == "keyed_element")
        .filter_map(|element| {
            let parts = named_children(element);
            match parts.as_slice() {
                [key, value, ..] => Some((literal_element(*key), literal_element(*value))),
                _ => None,
            }
        })
        .collect()
}

/// Positional (unkeyed) elements of a composite literal
pub fn positional_elements<'t>(literal: Node<'t>) -> Vec<Node<'t>> {
    let Some(body) = literal.child_by_field_name("body") else {
        return Vec::new();
    };

    named_children(body)
        .into_iter()
        .filter(|element| element.kind() != "keyed_element")
        .map(literal_element)
        .collect()
}

/// Strip `&` and parentheses around an expression
pub fn strip_address_of(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    loop {
        match current.kind() {
            "unary_expression" => {
                let is_address = current
                    .child_by_field_name("operator")
                    .map(|op| op.kind() == "&")
                    .unwrap_or(false);
                match current.child_by_field_name("operand") {
                    Some(operand) if is_address => current = operand,
                    _ => return current,
                }
            }
            "parenthesized_expression" => match current.named_child(0) {
                Some(inner) => current = inner,
                None => return current,
            },
            _ => return current,
        }
    }
}

/// Pre-order search for descendants matching `predicate`
///
/// Nested function literals are not entered when `skip_func_literals` is set.
pub fn find_descendants<'t>(
    node: Node<'t>,
    skip_func_literals: bool,
    predicate: &dyn Fn(Node<'t>) -> bool,
) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if predicate(current) {
            found.push(current);
        }
        let children = named_children(current);
        for child in children.into_iter().rev() {
            if skip_func_literals && child.kind() == "func_literal" {
                continue;
            }
            stack.push(child);
        }
    }
    found
}

/// Line of the first error or missing node, if any
pub fn first_error_line(node: Node<'_>) -> Option<usize> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(line(node));
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(first_error_line)
        .or_else(|| Some(line(node)))
}
