//! Source discovery and parsing
//!
//! Packages under the root are found by walking the tree; vendored packages
//! are pulled in breadth-first from the imports of already loaded packages,
//! so only the part of `vendor/` the provider actually reaches is parsed.

use crate::{syntax, ProgramError, Result};
use apiscan_common::AnalyzerConfig;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tree_sitter::{Parser, Tree};
use walkdir::{DirEntry, WalkDir};

/// One `import` line of a Go file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub alias: Option<String>,
    pub path: String,
}

pub(crate) struct ParsedFile {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub package_name: String,
    pub imports: Vec<ImportSpec>,
    pub source: String,
    pub tree: Tree,
}

pub(crate) struct ParsedPackage {
    pub import_path: String,
    pub name: String,
    pub dir: PathBuf,
    pub vendored: bool,
    pub files: Vec<ParsedFile>,
}

pub(crate) struct LoadedSources {
    pub module_path: String,
    pub packages: Vec<ParsedPackage>,
}

pub(crate) struct SourceLoader<'c> {
    root: PathBuf,
    config: &'c AnalyzerConfig,
    parser: Parser,
    module_path: String,
}

impl<'c> SourceLoader<'c> {
    pub fn new(root: &Path, config: &'c AnalyzerConfig) -> Result<Self> {
        if !root.is_dir() {
            return Err(ProgramError::MissingRoot(root.to_path_buf()));
        }

        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_go::LANGUAGE.into())?;

        let module_path = read_module_path(root)?;
        debug!(root = %root.display(), module = %module_path, "Loading Go sources");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            parser,
            module_path,
        })
    }

    pub fn load(mut self) -> Result<LoadedSources> {
        let mut packages = Vec::new();
        let mut known: HashSet<String> = HashSet::new();

        for (dir, files) in self.discover_local()? {
            let import_path = self.local_import_path(&dir);
            if let Some(package) = self.load_package(&dir, files, import_path, false)? {
                known.insert(package.import_path.clone());
                packages.push(package);
            }
        }

        let vendor_root = self.root.join("vendor");
        let mut queue: VecDeque<String> = packages
            .iter()
            .flat_map(|p| p.files.iter().flat_map(|f| f.imports.iter()))
            .map(|spec| spec.path.clone())
            .collect();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(import_path) = queue.pop_front() {
            if known.contains(&import_path) || !visited.insert(import_path.clone()) {
                continue;
            }

            let dir = vendor_root.join(&import_path);
            if !dir.is_dir() {
                continue;
            }

            let files = go_files_in(&dir)?;
            if let Some(package) = self.load_package(&dir, files, import_path, true)? {
                queue.extend(
                    package
                        .files
                        .iter()
                        .flat_map(|f| f.imports.iter())
                        .map(|spec| spec.path.clone()),
                );
                known.insert(package.import_path.clone());
                packages.push(package);
            }
        }

        debug!(packages = packages.len(), "Loaded Go packages");

        Ok(LoadedSources {
            module_path: self.module_path,
            packages,
        })
    }

    /// Go files under the root grouped by directory, outside `vendor/`
    fn discover_local(&self) -> Result<BTreeMap<PathBuf, Vec<PathBuf>>> {
        let mut dirs: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_skipped_dir(entry));

        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && is_go_source(entry.path()) {
                if let Some(parent) = entry.path().parent() {
                    dirs.entry(parent.to_path_buf())
                        .or_default()
                        .push(entry.path().to_path_buf());
                }
            }
        }

        Ok(dirs)
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.')
            || name == "vendor"
            || name == "testdata"
            || self.config.exclude_dirs.iter().any(|d| d.as_str() == name)
    }

    fn local_import_path(&self, dir: &Path) -> String {
        let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
        let suffix = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if suffix.is_empty() {
            self.module_path.clone()
        } else {
            format!("{}/{}", self.module_path, suffix)
        }
    }

    fn load_package(
        &mut self,
        dir: &Path,
        paths: Vec<PathBuf>,
        import_path: String,
        vendored: bool,
    ) -> Result<Option<ParsedPackage>> {
        let mut files: Vec<ParsedFile> = Vec::new();
        let mut name: Option<String> = None;

        for path in paths {
            let Some(file) = self.parse_file(&path)? else {
                continue;
            };

            match &name {
                None => name = Some(file.package_name.clone()),
                Some(existing) if *existing != file.package_name => {
                    debug!(
                        file = %file.relative_path.display(),
                        package = %file.package_name,
                        expected = %existing,
                        "Skipping file from a different package"
                    );
                    continue;
                }
                Some(_) => {}
            }
            files.push(file);
        }

        Ok(name.map(|name| ParsedPackage {
            import_path,
            name,
            dir: dir.to_path_buf(),
            vendored,
            files,
        }))
    }

    fn parse_file(&mut self, path: &Path) -> Result<Option<ParsedFile>> {
        let source = fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let tree = self
            .parser
            .parse(&source, None)
            .ok_or_else(|| ProgramError::Parse {
                path: path.to_path_buf(),
            })?;

        let relative_path = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_path_buf();

        let root = tree.root_node();
        if let Some(line) = syntax::first_error_line(root) {
            if self.config.strict_syntax {
                return Err(ProgramError::Syntax {
                    path: relative_path,
                    line,
                });
            }
            warn!(file = %relative_path.display(), line, "Syntax error in Go source");
        }

        let mut package_name = None;
        let mut imports = Vec::new();
        for node in syntax::named_children(root) {
            match node.kind() {
                "package_clause" => {
                    package_name = node
                        .named_child(0)
                        .map(|n| syntax::text(n, &source).to_string());
                }
                "import_declaration" => collect_imports(node, &source, &mut imports),
                _ => {}
            }
        }

        let Some(package_name) = package_name else {
            debug!(file = %relative_path.display(), "Skipping file without package clause");
            return Ok(None);
        };

        Ok(Some(ParsedFile {
            path: path.to_path_buf(),
            relative_path,
            package_name,
            imports,
            source,
            tree,
        }))
    }
}

fn collect_imports(node: tree_sitter::Node<'_>, source: &str, imports: &mut Vec<ImportSpec>) {
    for child in syntax::named_children(node) {
        match child.kind() {
            "import_spec_list" => collect_imports(child, source, imports),
            "import_spec" => {
                let Some(path) = child
                    .child_by_field_name("path")
                    .and_then(|p| syntax::string_literal(p, source))
                else {
                    continue;
                };
                let alias = child
                    .child_by_field_name("name")
                    .map(|n| syntax::text(n, source).to_string());
                imports.push(ImportSpec { alias, path });
            }
            _ => {}
        }
    }
}

fn read_module_path(root: &Path) -> Result<String> {
    let go_mod = root.join("go.mod");
    if !go_mod.is_file() {
        let fallback = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!(module = %fallback, "No go.mod found, using directory name as module path");
        return Ok(fallback);
    }

    let content = fs::read_to_string(&go_mod).map_err(|source| ProgramError::Io {
        path: go_mod.clone(),
        source,
    })?;

    Ok(parse_module_directive(&content).unwrap_or_default())
}

fn parse_module_directive(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let path = rest.split("//").next().unwrap_or(rest).trim().trim_matches('"');
        (!path.is_empty()).then(|| path.to_string())
    })
}

fn is_go_source(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".go") && !name.ends_with("_test.go")
}

fn go_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| ProgramError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProgramError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && is_go_source(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_module_directive() {
        assert_eq!(
            parse_module_directive("// header\nmodule github.com/example/provider\n\ngo 1.22\n"),
            Some("github.com/example/provider".to_string())
        );
        assert_eq!(parse_module_directive("modules foo\n"), None);
        assert_eq!(parse_module_directive("go 1.22\n"), None);
    }

    #[test]
    fn test_missing_root() {
        let config = AnalyzerConfig::default();
        let result = SourceLoader::new(Path::new("/nonexistent/provider"), &config);
        assert!(matches!(result, Err(ProgramError::MissingRoot(_))));
    }

    #[test]
    fn test_loads_local_and_reachable_vendor_packages() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "go.mod", "module example.com/provider\n");
        write(
            root,
            "internal/services/network/registration.go",
            "package network\n\nimport \"example.com/sdk/hubs\"\n\nvar _ = hubs.Client{}\n",
        );
        write(
            root,
            "internal/services/network/registration_test.go",
            "package network\n",
        );
        write(root, "vendor/example.com/sdk/hubs/client.go", "package hubs\n\nimport \"example.com/sdk/base\"\n\ntype Client struct{ base.Client }\n");
        write(root, "vendor/example.com/sdk/base/base.go", "package base\n\ntype Client struct{}\n");
        write(root, "vendor/example.com/sdk/unused/unused.go", "package unused\n");

        let config = AnalyzerConfig::default();
        let loaded = SourceLoader::new(root, &config).unwrap().load().unwrap();

        assert_eq!(loaded.module_path, "example.com/provider");
        let paths: Vec<_> = loaded.packages.iter().map(|p| p.import_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "example.com/provider/internal/services/network",
                "example.com/sdk/hubs",
                "example.com/sdk/base",
            ]
        );

        let network = &loaded.packages[0];
        assert_eq!(network.name, "network");
        assert!(!network.vendored);
        assert_eq!(network.files.len(), 1);
        assert!(loaded.packages[1].vendored);
    }

    #[test]
    fn test_excluded_dirs_are_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "go.mod", "module example.com/provider\n");
        write(root, "internal/services/a/a.go", "package a\n");
        write(root, "internal/generated/g.go", "package generated\n");

        let config = AnalyzerConfig {
            exclude_dirs: vec!["generated".to_string()],
            ..Default::default()
        };
        let loaded = SourceLoader::new(root, &config).unwrap().load().unwrap();

        assert_eq!(loaded.packages.len(), 1);
        assert_eq!(loaded.packages[0].name, "a");
    }

    #[test]
    fn test_strict_syntax() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "go.mod", "module example.com/provider\n");
        write(root, "internal/services/a/a.go", "package a\n\nfunc broken( {\n");

        let lenient = AnalyzerConfig::default();
        let loaded = SourceLoader::new(root, &lenient).unwrap().load().unwrap();
        assert_eq!(loaded.packages.len(), 1);

        let strict = AnalyzerConfig {
            strict_syntax: true,
            ..Default::default()
        };
        let result = SourceLoader::new(root, &strict).unwrap().load();
        assert!(matches!(result, Err(ProgramError::Syntax { .. })));
    }
}
