//! The loaded program: packages, files and their declaration indexes

use crate::index::{DeclLocation, FuncDecl, Indexer, PackageIndex, TypeDecl, TypeKind};
use crate::loader::{LoadedSources, SourceLoader};
use crate::syntax;
use crate::types::{GoType, ImportTable};
use crate::{ProgramError, Result};
use apiscan_common::AnalyzerConfig;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tree_sitter::{Node, Tree};

/// Bound on embedded-field promotion chains
const MAX_EMBEDDING_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) usize);

impl FileId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub(crate) usize);

/// A parsed Go file
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    /// Path relative to the program root
    pub relative_path: PathBuf,
    pub package: PackageId,
    pub source: String,
    pub imports: ImportTable,
    tree: Tree,
}

impl SourceFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        syntax::text(node, &self.source)
    }
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("id", &self.id)
            .field("relative_path", &self.relative_path)
            .field("package", &self.package)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub import_path: String,
    pub dir: PathBuf,
    pub vendored: bool,
    pub files: Vec<FileId>,
}

/// A service package directly under the services directory
#[derive(Debug, Clone, Copy)]
pub struct Module<'p> {
    pub name: &'p str,
    pub package: &'p Package,
    pub index: &'p PackageIndex,
}

/// A method found on a type, possibly promoted through embedding
#[derive(Debug, Clone, Copy)]
pub struct MethodTarget<'p> {
    /// Import path of the package declaring the method
    pub package: &'p str,
    pub decl: &'p FuncDecl,
}

impl MethodTarget<'_> {
    pub fn type_name(&self) -> &str {
        self.decl
            .receiver
            .as_ref()
            .map(|r| r.type_name.as_str())
            .unwrap_or_default()
    }
}

/// Every package of a provider tree plus the vendored packages it reaches
#[derive(Debug)]
pub struct Program {
    root: PathBuf,
    module_path: String,
    packages: Vec<Package>,
    files: Vec<SourceFile>,
    indexes: Vec<PackageIndex>,
    by_import_path: HashMap<String, PackageId>,
    by_relative_path: HashMap<PathBuf, FileId>,
    modules: BTreeMap<String, PackageId>,
}

impl Program {
    /// Load, parse and index the Go program rooted at `root`
    pub fn load(root: impl AsRef<Path>, config: &AnalyzerConfig) -> Result<Self> {
        let root = root.as_ref();
        let loaded = SourceLoader::new(root, config)?.load()?;
        let program = Self::assemble(root, loaded, config)?;

        info!(
            packages = program.packages.len(),
            files = program.files.len(),
            modules = program.modules.len(),
            "Loaded Go program"
        );
        Ok(program)
    }

    pub(crate) fn assemble(
        root: &Path,
        loaded: LoadedSources,
        config: &AnalyzerConfig,
    ) -> Result<Self> {
        let package_names: HashMap<String, String> = loaded
            .packages
            .iter()
            .map(|p| (p.import_path.clone(), p.name.clone()))
            .collect();

        let mut packages = Vec::new();
        let mut files = Vec::new();
        let mut indexed: HashMap<String, PackageIndex> = HashMap::new();

        for parsed in loaded.packages {
            let package_id = PackageId(packages.len());
            let mut index = PackageIndex::default();
            let mut file_ids = Vec::new();

            for file in parsed.files {
                let file_id = FileId(files.len());
                let imports = ImportTable::from_specs(&file.imports, &package_names);

                Indexer {
                    package: &parsed.import_path,
                    imports: &imports,
                    source: &file.source,
                    file: file_id,
                }
                .index_file(file.tree.root_node(), &mut index);

                file_ids.push(file_id);
                files.push(SourceFile {
                    id: file_id,
                    path: file.path,
                    relative_path: file.relative_path,
                    package: package_id,
                    source: file.source,
                    imports,
                    tree: file.tree,
                });
            }

            debug!(
                package = %parsed.import_path,
                files = file_ids.len(),
                decls = index.decl_count(),
                "Indexed package"
            );

            indexed.insert(parsed.import_path.clone(), index);
            packages.push(Package {
                id: package_id,
                name: parsed.name,
                import_path: parsed.import_path,
                dir: parsed.dir,
                vendored: parsed.vendored,
                files: file_ids,
            });
        }

        if indexed.len() != packages.len() {
            return Err(ProgramError::ModuleCountMismatch {
                loaded: packages.len(),
                indexed: indexed.len(),
            });
        }

        let indexes = packages
            .iter()
            .map(|p| indexed.remove(&p.import_path).unwrap_or_default())
            .collect();

        let by_import_path = packages
            .iter()
            .map(|p| (p.import_path.clone(), p.id))
            .collect();

        let by_relative_path = files
            .iter()
            .map(|f| (f.relative_path.clone(), f.id))
            .collect();

        let services_dir = root.join(&config.services_dir);
        let modules = packages
            .iter()
            .filter(|p| !p.vendored && p.dir.parent() == Some(services_dir.as_path()))
            .filter_map(|p| {
                let name = p.dir.file_name()?.to_string_lossy().to_string();
                Some((name, p.id))
            })
            .collect();

        Ok(Self {
            root: root.to_path_buf(),
            module_path: loaded.module_path,
            packages,
            files,
            indexes,
            by_import_path,
            by_relative_path,
            modules,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Module path declared in `go.mod`
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0]
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn index(&self, id: PackageId) -> &PackageIndex {
        &self.indexes[id.0]
    }

    pub fn package_by_path(&self, import_path: &str) -> Option<&Package> {
        self.by_import_path
            .get(import_path)
            .map(|id| &self.packages[id.0])
    }

    pub fn index_by_path(&self, import_path: &str) -> Option<&PackageIndex> {
        self.by_import_path
            .get(import_path)
            .map(|id| &self.indexes[id.0])
    }

    /// File at a path relative to the root
    pub fn file_at(&self, relative_path: impl AsRef<Path>) -> Option<&SourceFile> {
        self.by_relative_path
            .get(relative_path.as_ref())
            .map(|id| &self.files[id.0])
    }

    /// Import path of the package owning a file
    pub fn package_path_of(&self, file: FileId) -> &str {
        &self.package(self.file(file).package).import_path
    }

    /// Whether an import path belongs to a loaded vendored package
    pub fn is_vendored(&self, import_path: &str) -> bool {
        self.package_by_path(import_path)
            .map(|p| p.vendored)
            .unwrap_or(false)
    }

    /// Service modules in name order
    pub fn modules(&self) -> impl Iterator<Item = Module<'_>> {
        self.modules.iter().map(|(name, id)| Module {
            name: name.as_str(),
            package: &self.packages[id.0],
            index: &self.indexes[id.0],
        })
    }

    pub fn module(&self, name: &str) -> Option<Module<'_>> {
        let (name, id) = self.modules.get_key_value(name)?;
        Some(Module {
            name: name.as_str(),
            package: &self.packages[id.0],
            index: &self.indexes[id.0],
        })
    }

    /// Re-fetch the syntax node of a top-level declaration
    pub fn decl_node(&self, location: &DeclLocation) -> Option<Node<'_>> {
        self.files
            .get(location.file.0)?
            .root()
            .named_child(location.index)
    }

    pub fn type_decl(&self, package: &str, name: &str) -> Option<&TypeDecl> {
        self.index_by_path(package)?.types.get(name)
    }

    pub fn func_decl(&self, package: &str, name: &str) -> Option<&FuncDecl> {
        self.index_by_path(package)?.funcs.get(name)
    }

    pub fn method_decl(&self, package: &str, type_name: &str, method: &str) -> Option<&FuncDecl> {
        self.index_by_path(package)?.method(type_name, method)
    }

    pub fn package_var(&self, package: &str, name: &str) -> Option<&GoType> {
        self.index_by_path(package)?.vars.get(name)
    }

    /// Type of a field selected on `ty`, following embedded fields
    pub fn field_type(&self, ty: &GoType, field: &str) -> Option<GoType> {
        self.field_type_at(ty, field, 0)
    }

    fn field_type_at(&self, ty: &GoType, field: &str, depth: usize) -> Option<GoType> {
        if depth > MAX_EMBEDDING_DEPTH {
            return None;
        }
        let (package, name) = ty.as_named()?;
        match &self.type_decl(package, name)?.kind {
            TypeKind::Struct(fields) => {
                if let Some(found) = fields.iter().find(|f| f.name == field) {
                    return Some(found.ty.clone());
                }
                fields
                    .iter()
                    .filter(|f| f.embedded)
                    .find_map(|f| self.field_type_at(&f.ty, field, depth + 1))
            }
            TypeKind::Defined { underlying, .. } => self.field_type_at(underlying, field, depth + 1),
            _ => None,
        }
    }

    /// Method `name` callable on `ty`, including methods promoted from embedded fields
    pub fn find_method(&self, ty: &GoType, name: &str) -> Option<MethodTarget<'_>> {
        self.find_method_at(ty, name, 0)
    }

    fn find_method_at(&self, ty: &GoType, name: &str, depth: usize) -> Option<MethodTarget<'_>> {
        if depth > MAX_EMBEDDING_DEPTH {
            return None;
        }
        let (package, type_name) = ty.as_named()?;
        let package = self.package_by_path(package)?;
        let index = self.index(package.id);

        if let Some(decl) = index.method(type_name, name) {
            return Some(MethodTarget {
                package: &package.import_path,
                decl,
            });
        }

        match &index.types.get(type_name)?.kind {
            TypeKind::Struct(fields) => fields
                .iter()
                .filter(|f| f.embedded)
                .find_map(|f| self.find_method_at(&f.ty, name, depth + 1)),
            TypeKind::Defined {
                underlying,
                alias: true,
            } => self.find_method_at(underlying, name, depth + 1),
            _ => None,
        }
    }
}
