//! Per-package declaration index
//!
//! Records every top-level type, function, method and package variable with
//! its static signature. Declarations keep a [`DeclLocation`] so their syntax
//! node can be re-fetched from the owning file on demand.

use crate::program::FileId;
use crate::syntax;
use crate::types::{resolve_type_expr, GoType, ImportTable};
use std::collections::HashMap;
use tree_sitter::Node;

/// Where a top-level declaration lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclLocation {
    pub file: FileId,
    /// Position among the file root's named children
    pub index: usize,
    /// 1-based source line
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: GoType,
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Struct(Vec<FieldDecl>),
    Interface,
    /// `type A B` or `type A = B`
    Defined { underlying: GoType, alias: bool },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub location: DeclLocation,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    pub name: Option<String>,
    pub type_name: String,
    pub pointer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Option<GoType>,
}

/// A function or method declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub receiver: Option<Receiver>,
    pub location: DeclLocation,
    pub params: Vec<Param>,
    pub results: Vec<GoType>,
}

impl FuncDecl {
    pub fn is_method(&self) -> bool {
        self.receiver.is_some()
    }

    /// `Type.Method` for methods, the bare name for functions
    pub fn qualified_name(&self) -> String {
        match &self.receiver {
            Some(receiver) => format!("{}.{}", receiver.type_name, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    pub types: HashMap<String, TypeDecl>,
    pub funcs: HashMap<String, FuncDecl>,
    /// Methods keyed by receiver base type name, then method name
    pub methods: HashMap<String, HashMap<String, FuncDecl>>,
    pub vars: HashMap<String, GoType>,
}

impl PackageIndex {
    pub fn method(&self, type_name: &str, method: &str) -> Option<&FuncDecl> {
        self.methods.get(type_name)?.get(method)
    }

    /// Functions and methods declared in one file, in source order
    pub fn funcs_in_file(&self, file: FileId) -> Vec<&FuncDecl> {
        let mut funcs: Vec<&FuncDecl> = self
            .funcs
            .values()
            .chain(self.methods.values().flat_map(|m| m.values()))
            .filter(|f| f.location.file == file)
            .collect();
        funcs.sort_by_key(|f| f.location.index);
        funcs
    }

    pub fn decl_count(&self) -> usize {
        self.types.len()
            + self.funcs.len()
            + self.methods.values().map(HashMap::len).sum::<usize>()
            + self.vars.len()
    }
}

/// Populates a [`PackageIndex`] one file at a time
pub(crate) struct Indexer<'a> {
    pub package: &'a str,
    pub imports: &'a ImportTable,
    pub source: &'a str,
    pub file: FileId,
}

impl Indexer<'_> {
    pub fn index_file(&self, root: Node<'_>, index: &mut PackageIndex) {
        let mut cursor = root.walk();
        for (position, node) in root.named_children(&mut cursor).enumerate() {
            let location = DeclLocation {
                file: self.file,
                index: position,
                line: syntax::line(node),
            };
            match node.kind() {
                "function_declaration" => {
                    if let Some(func) = self.func_decl(node, location) {
                        index.funcs.insert(func.name.clone(), func);
                    }
                }
                "method_declaration" => {
                    if let Some(func) = self.func_decl(node, location) {
                        if let Some(receiver) = &func.receiver {
                            index
                                .methods
                                .entry(receiver.type_name.clone())
                                .or_default()
                                .insert(func.name.clone(), func);
                        }
                    }
                }
                "type_declaration" => {
                    for spec in syntax::named_children(node) {
                        if let Some(decl) = self.type_decl(spec, location) {
                            index.types.insert(decl.name.clone(), decl);
                        }
                    }
                }
                "var_declaration" => self.index_vars(node, index),
                _ => {}
            }
        }
    }

    fn resolve(&self, node: Node<'_>) -> Option<GoType> {
        resolve_type_expr(node, self.source, self.package, self.imports)
    }

    fn func_decl(&self, node: Node<'_>, location: DeclLocation) -> Option<FuncDecl> {
        let name = syntax::text(node.child_by_field_name("name")?, self.source).to_string();
        let receiver = node
            .child_by_field_name("receiver")
            .and_then(|list| self.receiver(list));

        let params = node
            .child_by_field_name("parameters")
            .map(|list| self.params(list))
            .unwrap_or_default();

        let results = match node.child_by_field_name("result") {
            Some(result) if result.kind() == "parameter_list" => self
                .params(result)
                .into_iter()
                .filter_map(|p| p.ty)
                .collect(),
            Some(result) => self.resolve(result).into_iter().collect(),
            None => Vec::new(),
        };

        Some(FuncDecl {
            name,
            receiver,
            location,
            params,
            results,
        })
    }

    fn receiver(&self, list: Node<'_>) -> Option<Receiver> {
        let decl = syntax::named_children(list)
            .into_iter()
            .find(|n| n.kind() == "parameter_declaration")?;

        let name = decl
            .child_by_field_name("name")
            .map(|n| syntax::text(n, self.source).to_string());

        let mut ty = decl.child_by_field_name("type")?;
        let mut pointer = false;
        if ty.kind() == "pointer_type" {
            pointer = true;
            ty = ty.named_child(0)?;
        }
        if ty.kind() == "generic_type" {
            ty = ty.child_by_field_name("type")?;
        }

        Some(Receiver {
            name,
            type_name: syntax::text(ty, self.source).to_string(),
            pointer,
        })
    }

    pub(crate) fn params(&self, list: Node<'_>) -> Vec<Param> {
        parameters(list, self.source, |n| self.resolve(n))
    }

    fn type_decl(&self, spec: Node<'_>, location: DeclLocation) -> Option<TypeDecl> {
        let alias = match spec.kind() {
            "type_spec" => false,
            "type_alias" => true,
            _ => return None,
        };

        let name = syntax::text(spec.child_by_field_name("name")?, self.source).to_string();
        let ty = spec.child_by_field_name("type")?;

        let kind = match ty.kind() {
            "struct_type" => TypeKind::Struct(self.struct_fields(ty)),
            "interface_type" => TypeKind::Interface,
            _ => match self.resolve(ty) {
                Some(underlying) => TypeKind::Defined { underlying, alias },
                None => TypeKind::Other,
            },
        };

        Some(TypeDecl {
            name,
            location: DeclLocation {
                line: syntax::line(spec),
                ..location
            },
            kind,
        })
    }

    fn struct_fields(&self, struct_type: Node<'_>) -> Vec<FieldDecl> {
        let Some(list) = syntax::named_children(struct_type)
            .into_iter()
            .find(|n| n.kind() == "field_declaration_list")
        else {
            return Vec::new();
        };

        let mut fields = Vec::new();
        for decl in syntax::named_children(list) {
            if decl.kind() != "field_declaration" {
                continue;
            }
            let Some(type_node) = decl.child_by_field_name("type") else {
                continue;
            };
            let Some(ty) = self.resolve(type_node) else {
                continue;
            };

            let names = syntax::field_children(decl, "name");
            if names.is_empty() {
                // Embedded: `Base`, `*Base` or `pkg.Base`
                let mut cursor = decl.walk();
                let pointer = decl.children(&mut cursor).any(|c| c.kind() == "*");
                let Some((_, base)) = ty.as_named() else {
                    continue;
                };
                fields.push(FieldDecl {
                    name: base.to_string(),
                    ty: if pointer && !ty.is_pointer() {
                        GoType::pointer(ty.clone())
                    } else {
                        ty.clone()
                    },
                    embedded: true,
                });
            } else {
                for name in names {
                    fields.push(FieldDecl {
                        name: syntax::text(name, self.source).to_string(),
                        ty: ty.clone(),
                        embedded: false,
                    });
                }
            }
        }
        fields
    }

    fn index_vars(&self, node: Node<'_>, index: &mut PackageIndex) {
        for spec in var_specs(node) {
            let explicit = spec.child_by_field_name("type").and_then(|t| self.resolve(t));
            let values = spec
                .child_by_field_name("value")
                .map(syntax::expressions)
                .unwrap_or_default();

            for (position, name) in syntax::field_children(spec, "name").into_iter().enumerate() {
                let ty = explicit.clone().or_else(|| {
                    values
                        .get(position)
                        .and_then(|value| self.literal_type(*value))
                });
                if let Some(ty) = ty {
                    index
                        .vars
                        .insert(syntax::text(name, self.source).to_string(), ty);
                }
            }
        }
    }

    /// Type of `T{...}` or `&T{...}` initialisers
    fn literal_type(&self, value: Node<'_>) -> Option<GoType> {
        let stripped = syntax::strip_address_of(value);
        if stripped.kind() != "composite_literal" {
            return None;
        }
        let ty = self.resolve(stripped.child_by_field_name("type")?)?;
        if stripped.id() != value.id() {
            Some(GoType::pointer(ty))
        } else {
            Some(ty)
        }
    }
}

/// `var_spec` nodes of a `var` declaration, grouped or not
pub(crate) fn var_specs(node: Node<'_>) -> Vec<Node<'_>> {
    let mut specs = Vec::new();
    for child in syntax::named_children(node) {
        match child.kind() {
            "var_spec" => specs.push(child),
            "var_spec_list" => specs.extend(
                syntax::named_children(child)
                    .into_iter()
                    .filter(|n| n.kind() == "var_spec"),
            ),
            _ => {}
        }
    }
    specs
}

/// Parameters of a `parameter_list`, one entry per declared name
pub(crate) fn parameters(
    list: Node<'_>,
    source: &str,
    resolve: impl Fn(Node<'_>) -> Option<GoType>,
) -> Vec<Param> {
    let mut params = Vec::new();
    for decl in syntax::named_children(list) {
        let variadic = match decl.kind() {
            "parameter_declaration" => false,
            "variadic_parameter_declaration" => true,
            _ => continue,
        };

        let ty = decl.child_by_field_name("type").and_then(&resolve).map(|ty| {
            if variadic {
                GoType::Slice(Box::new(ty))
            } else {
                ty
            }
        });

        let names = syntax::field_children(decl, "name");
        if names.is_empty() {
            params.push(Param { name: None, ty });
        } else {
            for name in names {
                params.push(Param {
                    name: Some(syntax::text(name, source).to_string()),
                    ty: ty.clone(),
                });
            }
        }
    }
    params
}
