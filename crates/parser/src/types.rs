//! Static Go types as far as the analyzer needs them

use crate::loader::ImportSpec;
use crate::syntax;
use std::collections::HashMap;
use std::fmt;
use tree_sitter::Node;

const BASIC_TYPES: &[&str] = &[
    "bool", "byte", "complex64", "complex128", "error", "float32", "float64", "int", "int8",
    "int16", "int32", "int64", "rune", "string", "uint", "uint8", "uint16", "uint32", "uint64",
    "uintptr",
];

/// A statically known Go type
///
/// Named types carry the full import path of their declaring package so that
/// identically named types in different SDK versions stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GoType {
    Named { package: String, name: String },
    Basic(String),
    Pointer(Box<GoType>),
    Slice(Box<GoType>),
    Map(Box<GoType>, Box<GoType>),
    Interface,
    Func,
}

impl GoType {
    pub fn named(package: impl Into<String>, name: impl Into<String>) -> Self {
        GoType::Named {
            package: package.into(),
            name: name.into(),
        }
    }

    pub fn pointer(inner: GoType) -> Self {
        GoType::Pointer(Box::new(inner))
    }

    /// The type with every pointer indirection removed
    pub fn deref(&self) -> &GoType {
        match self {
            GoType::Pointer(inner) => inner.deref(),
            other => other,
        }
    }

    /// `(import path, type name)` of a named type, looking through pointers
    pub fn as_named(&self) -> Option<(&str, &str)> {
        match self.deref() {
            GoType::Named { package, name } => Some((package.as_str(), name.as_str())),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, GoType::Pointer(_))
    }

    /// Key and element types when ranging over a slice or map
    pub fn range_types(&self) -> Option<(GoType, GoType)> {
        match self.deref() {
            GoType::Slice(element) => Some((GoType::Basic("int".to_string()), (**element).clone())),
            GoType::Map(key, value) => Some(((**key).clone(), (**value).clone())),
            _ => None,
        }
    }

    /// Element type produced by indexing
    pub fn index_type(&self) -> Option<GoType> {
        self.range_types().map(|(_, element)| element)
    }
}

impl fmt::Display for GoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoType::Named { package, name } => {
                let short = package.rsplit('/').next().unwrap_or(package);
                write!(f, "{short}.{name}")
            }
            GoType::Basic(name) => f.write_str(name),
            GoType::Pointer(inner) => write!(f, "*{inner}"),
            GoType::Slice(inner) => write!(f, "[]{inner}"),
            GoType::Map(key, value) => write!(f, "map[{key}]{value}"),
            GoType::Interface => f.write_str("interface{}"),
            GoType::Func => f.write_str("func"),
        }
    }
}

/// Maps the identifiers a file uses for its imports to import paths
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    aliases: HashMap<String, String>,
}

impl ImportTable {
    /// Build a table from a file's import specs
    ///
    /// Unaliased imports are bound to the imported package's declared name
    /// when it was loaded, otherwise to the last path segment.
    pub fn from_specs(specs: &[ImportSpec], package_names: &HashMap<String, String>) -> Self {
        let mut aliases = HashMap::new();
        for spec in specs {
            let alias = match spec.alias.as_deref() {
                Some("_") | Some(".") => continue,
                Some(alias) => alias.to_string(),
                None => package_names
                    .get(&spec.path)
                    .cloned()
                    .unwrap_or_else(|| default_package_name(&spec.path)),
            };
            aliases.insert(alias, spec.path.clone());
        }
        Self { aliases }
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

fn default_package_name(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or(path);
    // gopkg.in style `yaml.v3` and major-version suffixes `/v2`
    if last.len() > 1 && last.starts_with('v') && last[1..].chars().all(|c| c.is_ascii_digit()) {
        let trimmed = path.trim_end_matches(last).trim_end_matches('/');
        return default_package_name(trimmed);
    }
    last.split('.').next().unwrap_or(last).replace('-', "_")
}

/// Resolve a type expression in the context of its declaring file
pub fn resolve_type_expr(
    node: Node<'_>,
    source: &str,
    package: &str,
    imports: &ImportTable,
) -> Option<GoType> {
    match node.kind() {
        "type_identifier" | "identifier" => {
            let name = syntax::text(node, source);
            if BASIC_TYPES.contains(&name) {
                Some(GoType::Basic(name.to_string()))
            } else if name == "any" {
                Some(GoType::Interface)
            } else {
                Some(GoType::named(package, name))
            }
        }
        "qualified_type" => {
            let alias = syntax::text(node.child_by_field_name("package")?, source);
            let name = syntax::text(node.child_by_field_name("name")?, source);
            Some(GoType::named(imports.resolve(alias)?, name))
        }
        // `new(pkg.Type)` and conversions parse the type as an expression
        "selector_expression" => {
            let operand = node.child_by_field_name("operand")?;
            if operand.kind() != "identifier" {
                return None;
            }
            let alias = syntax::text(operand, source);
            let name = syntax::text(node.child_by_field_name("field")?, source);
            Some(GoType::named(imports.resolve(alias)?, name))
        }
        "pointer_type" => {
            let inner = node.named_child(0)?;
            resolve_type_expr(inner, source, package, imports).map(GoType::pointer)
        }
        "unary_expression" => {
            // `*pkg.Type` in expression position
            let operand = node.child_by_field_name("operand")?;
            resolve_type_expr(operand, source, package, imports).map(GoType::pointer)
        }
        "slice_type" | "array_type" | "implicit_length_array_type" => {
            let element = node.child_by_field_name("element")?;
            resolve_type_expr(element, source, package, imports)
                .map(|ty| GoType::Slice(Box::new(ty)))
        }
        "map_type" => {
            let key = resolve_type_expr(node.child_by_field_name("key")?, source, package, imports)?;
            let value =
                resolve_type_expr(node.child_by_field_name("value")?, source, package, imports)?;
            Some(GoType::Map(Box::new(key), Box::new(value)))
        }
        "generic_type" => {
            resolve_type_expr(node.child_by_field_name("type")?, source, package, imports)
        }
        "parenthesized_type" | "parenthesized_expression" => {
            resolve_type_expr(node.named_child(0)?, source, package, imports)
        }
        "interface_type" => Some(GoType::Interface),
        "function_type" => Some(GoType::Func),
        _ => None,
    }
}
