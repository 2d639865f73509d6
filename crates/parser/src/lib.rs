//! Whole-program Go source loading for apiscan
//!
//! This crate turns a provider source tree into a [`Program`]: every service
//! package, every package they reach through `vendor/`, their syntax trees and
//! a declaration index used to statically type expressions.
//!
//! ## Loading Strategy
//!
//! - Packages under the root (outside `vendor/`) are discovered by walking the tree
//! - Vendored packages are loaded on demand, following imports breadth-first
//! - Every file is parsed once with tree-sitter-go
//! - Struct fields, function signatures and package vars are indexed with
//!   their types resolved in the declaring file's import context
//!
//! The resulting program is immutable; analysis stages borrow it and use
//! [`Scope`] to infer the static type of expressions inside function bodies.
//!
//! # Examples
//!
//! ```no_run
//! use apiscan_common::AnalyzerConfig;
//! use apiscan_parser::Program;
//!
//! let program = Program::load("./terraform-provider-azurerm", &AnalyzerConfig::default())
//!     .expect("Failed to load provider");
//!
//! for module in program.modules() {
//!     println!("{}: {} files", module.name, module.package.files.len());
//! }
//! ```

mod index;
mod loader;
mod program;
mod scope;
pub mod syntax;
mod types;

pub use index::{
    DeclLocation, FieldDecl, FuncDecl, PackageIndex, Param, Receiver, TypeDecl, TypeKind,
};
pub use loader::ImportSpec;
pub use program::{FileId, MethodTarget, Module, Package, PackageId, Program, SourceFile};
pub use scope::{walk, Callee, Scope};
pub use types::{GoType, ImportTable};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort program loading
///
/// Every variant is fatal: the program is the foundation of all later
/// analysis and is never partially built.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Source root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to load Go grammar: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    #[error("Failed to parse Go source: {path}")]
    Parse { path: PathBuf },

    #[error("Syntax error in {path} at line {line}")]
    Syntax { path: PathBuf, line: usize },

    #[error("Loaded {loaded} packages but indexed {indexed}; package import paths are not unique")]
    ModuleCountMismatch { loaded: usize, indexed: usize },
}

pub type Result<T> = std::result::Result<T, ProgramError>;
