#![doc(html_root_url = "https://docs.rs/protoparse/0.1.0")]

//! `protoparse` is a compiler front end for Protocol Buffers `proto3`
//! source: it tokenizes and parses `.proto` files, resolves imports across a
//! configurable search path, builds a fully-qualified symbol table, and
//! validates the proto3 language rules, producing the resolved ASTs a
//! descriptor generator consumes.
//!
//! ## Example
//!
//! Parse a single source string:
//!
//! ```rust
//! let set = protoparse::parse_str(
//!     r#"
//!     syntax = "proto3";
//!     package snazzy.items;
//!
//!     message Shirt {
//!       string color = 1;
//!       Size size = 2;
//!       enum Size {
//!         SMALL = 0;
//!         LARGE = 1;
//!       }
//!     }
//!     "#,
//! )
//! .unwrap();
//!
//! assert!(set.errors.is_empty());
//! assert!(set.symbols.contains("snazzy.items.Shirt"));
//! assert!(set.symbols.contains("snazzy.items.Shirt.Size"));
//! ```
//!
//! Parse a file and its transitive imports from disk, searching the given
//! include directories:
//!
//! ```rust,no_run
//! let set = protoparse::Config::new()
//!     .import_path("proto")
//!     .import_path("third_party")
//!     .parse_file("proto/frontend.proto")
//!     .unwrap();
//! for file in &set.files {
//!     println!("{}: package {:?}", file.path.display(), file.ast.package);
//! }
//! ```
//!
//! ## Pipeline
//!
//! Loading runs the stages in order: the dependency resolver locates each
//! import and drives the lexer and parser over every file, then symbol
//! resolution and validation run over the whole set in topological order.
//! Errors do not abort the pipeline; each stage accumulates what it finds
//! and continues where recovery is possible. Only a handful of failures are
//! hard stops: a missing root file, an unresolvable import (unless
//! [`Config::allow_missing_imports`] demotes it), and an import cycle.

mod ast;
mod error;
mod import;
mod lexer;
mod parser;
mod resolver;

use std::path::{Path, PathBuf};

use log::debug;

pub use crate::ast::{
    EnumNode, EnumValueNode, ExtendNode, FieldLabel, FieldNode, FieldType, Import, ImportKind,
    MessageNode, OneofNode, OptionNode, OptionValue, ProtoAst, ProtoVersion, RpcNode, ScalarType,
    ServiceNode,
};
pub use crate::error::{
    LexError, LexErrorKind, ParseError, ResolveError, SemanticError, SemanticErrorKind,
    SyntaxError, SyntaxErrorKind,
};
pub use crate::import::{FileSource, MemoryFileSource, OsFileSource, ResolvedFile};
pub use crate::lexer::{
    tokenize, CommentKind, Keyword, Position, Token, TokenKind,
};
pub use crate::parser::{parse, IMPLEMENTATION_RESERVED, MAX_FIELD_NUMBER};
pub use crate::resolver::{Symbol, SymbolKind, SymbolTable};

/// The result of a successful pipeline run: every loaded file in
/// dependency-topological order, the symbol table across all of them, and
/// the recoverable diagnostics that were accumulated along the way.
///
/// `errors` being non-empty means the sources are not valid proto3 even
/// though ASTs were produced; a caller feeding a descriptor generator should
/// treat that as failure.
#[derive(Debug)]
pub struct FileSet {
    /// Loaded files, dependencies before dependents.
    pub files: Vec<ResolvedFile>,
    pub symbols: SymbolTable,
    /// Accumulated lexical, syntactic, and semantic diagnostics, ordered by
    /// file (dependency order) and source position.
    pub errors: Vec<ParseError>,
}

/// Configuration for a parse run.
///
/// This builder owns the import search path, the resolver knobs, and the
/// [`FileSource`] capability the pipeline reads through.
pub struct Config {
    pub(crate) import_paths: Vec<PathBuf>,
    pub(crate) allow_missing_imports: bool,
    pub(crate) recognize_well_known_types: bool,
    pub(crate) max_depth: u32,
    pub(crate) file_source: Box<dyn FileSource>,
}

impl Config {
    /// Creates a configuration with default options: no import paths, hard
    /// failures on missing imports, well-known type stubs enabled, and
    /// effectively unbounded import depth.
    pub fn new() -> Config {
        Config::default()
    }

    /// Appends a directory to the import search path. Directories are
    /// probed in the order they were added.
    pub fn import_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.import_paths.push(path.into());
        self
    }

    /// Appends several directories to the import search path.
    pub fn import_paths<I, P>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.import_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Demotes unresolvable imports from hard failures to logged warnings;
    /// the missing file is elided from the output.
    pub fn allow_missing_imports(&mut self, allow: bool) -> &mut Self {
        self.allow_missing_imports = allow;
        self
    }

    /// Controls synthesis of stub files for `google/protobuf/*.proto`
    /// imports that are not found on disk. Enabled by default.
    pub fn recognize_well_known_types(&mut self, recognize: bool) -> &mut Self {
        self.recognize_well_known_types = recognize;
        self
    }

    /// Caps the transitive import depth.
    pub fn max_depth(&mut self, depth: u32) -> &mut Self {
        self.max_depth = depth;
        self
    }

    /// Replaces the [`FileSource`] the pipeline reads through.
    pub fn file_source(&mut self, source: impl FileSource + 'static) -> &mut Self {
        self.file_source = Box::new(source);
        self
    }

    /// Parses `path` and its transitive imports.
    ///
    /// Returns `Err` only for hard failures: a missing root file, an
    /// unresolvable import, an import cycle, or an I/O failure. Recoverable
    /// diagnostics are returned in [`FileSet::errors`].
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<FileSet, Vec<ParseError>> {
        self.parse_files(&[path])
    }

    /// Parses several root files and their transitive imports into one
    /// [`FileSet`]. Files shared between roots are loaded once.
    pub fn parse_files(
        &self,
        paths: &[impl AsRef<Path>],
    ) -> Result<FileSet, Vec<ParseError>> {
        let mut loader = import::Loader::new(self);
        for path in paths {
            let path = path.as_ref();
            let root = match self.file_source.resolve_path(path, &self.import_paths) {
                Some(root) => root,
                None => return Err(vec![ParseError::FileNotFound(path.to_path_buf())]),
            };
            loader.load(&root).map_err(|error| vec![error])?;
        }
        let (mut files, mut errors) = loader.finish();
        debug!("loaded {} files, resolving symbols", files.len());

        let (symbols, semantic_errors) = resolver::resolve(&mut files);
        errors.extend(semantic_errors.into_iter().map(ParseError::from));
        sort_errors(&mut errors, &files);

        Ok(FileSet {
            files,
            symbols,
            errors,
        })
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            import_paths: Vec::new(),
            allow_missing_imports: false,
            recognize_well_known_types: true,
            max_depth: u32::MAX,
            file_source: Box::new(OsFileSource),
        }
    }
}

/// Orders diagnostics by file (dependency order), then source position.
fn sort_errors(errors: &mut [ParseError], files: &[ResolvedFile]) {
    let order: std::collections::HashMap<&Path, usize> = files
        .iter()
        .enumerate()
        .map(|(idx, file)| (file.path.as_path(), idx))
        .collect();
    errors.sort_by_key(|error| {
        let file_rank = error
            .file()
            .and_then(|file| order.get(file).copied())
            .unwrap_or(usize::MAX);
        let position = error.position().unwrap_or_default();
        (file_rank, position.line, position.column)
    });
}

/// Parses `path` and its transitive imports with default options.
pub fn parse_file(path: impl AsRef<Path>) -> Result<FileSet, Vec<ParseError>> {
    Config::new().parse_file(path)
}

/// Parses several root files and their transitive imports with default
/// options.
pub fn parse_files(paths: &[impl AsRef<Path>]) -> Result<FileSet, Vec<ParseError>> {
    Config::new().parse_files(paths)
}

/// Parses a single in-memory source with default options.
///
/// Imports of well-known `google/protobuf/*.proto` files resolve against
/// synthesized stubs; any other import is a hard failure, since there is no
/// disk to search.
pub fn parse_str(source: &str) -> Result<FileSet, Vec<ParseError>> {
    let mut file_source = MemoryFileSource::new();
    file_source.insert("main.proto", source);
    Config::new()
        .file_source(file_source)
        .parse_file("main.proto")
}
