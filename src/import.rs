//! Import resolution: locating files, loading the transitive import graph,
//! detecting cycles, and producing a topological file order.
//!
//! Loading is a depth-first traversal that parses each file as it is
//! reached. The graph of files is kept in a [`petgraph::Graph`] keyed by
//! absolute path; a grey/black coloring over its nodes detects cycles, and
//! the traversal's post-order is the topological output (dependencies before
//! dependents, ties broken in import-declaration order).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use petgraph::graph::{Graph, NodeIndex};
use regex::Regex;

use crate::ast::ProtoAst;
use crate::error::{ParseError, ResolveError};
use crate::lexer;
use crate::parser;
use crate::Config;

/// Reads file contents and probes existence along search paths.
///
/// The core performs no I/O of its own; every read goes through this
/// capability, so callers can substitute an in-memory source for tests or
/// sandboxed use.
pub trait FileSource {
    fn read_file(&self, path: &Path) -> io::Result<String>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Tries `path` as-is, then joined to each search directory in order.
    fn resolve_path(&self, path: &Path, search: &[PathBuf]) -> Option<PathBuf> {
        if self.file_exists(path) {
            return Some(path.to_path_buf());
        }
        search
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| self.file_exists(candidate))
    }
}

/// The default [`FileSource`], backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSource;

impl FileSource for OsFileSource {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// An in-memory [`FileSource`] over a path-to-source map.
#[derive(Debug, Default)]
pub struct MemoryFileSource {
    files: HashMap<PathBuf, String>,
}

impl MemoryFileSource {
    pub fn new() -> MemoryFileSource {
        MemoryFileSource::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), source.into());
        self
    }
}

impl FileSource for MemoryFileSource {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

/// A loaded and parsed file.
#[derive(Debug)]
pub struct ResolvedFile {
    /// The path the file was read from (or the virtual path of a
    /// synthesized well-known stub).
    pub path: PathBuf,
    pub ast: ProtoAst,
    /// Absolute paths of the direct imports, in declaration order.
    pub imports: Vec<PathBuf>,
    /// Whether this is a `google/protobuf/` well-known type file.
    pub is_well_known: bool,
    /// The package name extracted textually before parsing (a prefilter);
    /// `ast.package` is the authoritative value.
    pub package: Option<String>,
}

static PACKAGE_PREFILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_.]*)\s*;").expect("package pattern")
});

/// Extracts the package name from raw source without parsing.
pub(crate) fn extract_package(source: &str) -> Option<String> {
    PACKAGE_PREFILTER
        .captures(source)
        .map(|captures| captures[1].to_string())
}

/// Stub sources for the well-known `google/protobuf/*.proto` files,
/// synthesized when an import does not resolve on disk and
/// `recognize_well_known_types` is enabled. The stubs declare the type
/// names the resolver needs; `descriptor.proto` is included because proto3
/// `extend` targets live there.
static WELL_KNOWN_STUBS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            "google/protobuf/any.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage Any {\n  string type_url = 1;\n  bytes value = 2;\n}\n",
        ),
        (
            "google/protobuf/api.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage Api {\n  string name = 1;\n  repeated Method methods = 2;\n  repeated Mixin mixins = 6;\n}\nmessage Method {\n  string name = 1;\n  string request_type_url = 2;\n  bool request_streaming = 3;\n  string response_type_url = 4;\n  bool response_streaming = 5;\n}\nmessage Mixin {\n  string name = 1;\n  string root = 2;\n}\n",
        ),
        (
            "google/protobuf/descriptor.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage FileOptions {}\nmessage MessageOptions {}\nmessage FieldOptions {}\nmessage OneofOptions {}\nmessage EnumOptions {}\nmessage EnumValueOptions {}\nmessage ServiceOptions {}\nmessage MethodOptions {}\n",
        ),
        (
            "google/protobuf/duration.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage Duration {\n  int64 seconds = 1;\n  int32 nanos = 2;\n}\n",
        ),
        (
            "google/protobuf/empty.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage Empty {}\n",
        ),
        (
            "google/protobuf/field_mask.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage FieldMask {\n  repeated string paths = 1;\n}\n",
        ),
        (
            "google/protobuf/source_context.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage SourceContext {\n  string file_name = 1;\n}\n",
        ),
        (
            "google/protobuf/struct.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nenum NullValue {\n  NULL_VALUE = 0;\n}\nmessage Struct {\n  map<string, Value> fields = 1;\n}\nmessage Value {\n  oneof kind {\n    NullValue null_value = 1;\n    double number_value = 2;\n    string string_value = 3;\n    bool bool_value = 4;\n    Struct struct_value = 5;\n    ListValue list_value = 6;\n  }\n}\nmessage ListValue {\n  repeated Value values = 1;\n}\n",
        ),
        (
            "google/protobuf/timestamp.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage Timestamp {\n  int64 seconds = 1;\n  int32 nanos = 2;\n}\n",
        ),
        (
            "google/protobuf/wrappers.proto",
            "syntax = \"proto3\";\npackage google.protobuf;\nmessage DoubleValue { double value = 1; }\nmessage FloatValue { float value = 1; }\nmessage Int64Value { int64 value = 1; }\nmessage UInt64Value { uint64 value = 1; }\nmessage Int32Value { int32 value = 1; }\nmessage UInt32Value { uint32 value = 1; }\nmessage BoolValue { bool value = 1; }\nmessage StringValue { string value = 1; }\nmessage BytesValue { bytes value = 1; }\n",
        ),
    ])
});

/// Whether `path` names a well-known `google/protobuf/` file.
fn is_well_known_path(path: &Path) -> bool {
    let text = path.to_string_lossy().replace('\\', "/");
    text.contains("google/protobuf/")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoadState {
    /// On the current DFS stack (grey).
    Loading,
    /// Fully loaded, imports included (black).
    Loaded,
}

/// Transitively loads a root file and everything it imports.
pub(crate) struct Loader<'a> {
    config: &'a Config,
    graph: Graph<PathBuf, ()>,
    index: HashMap<PathBuf, NodeIndex>,
    state: HashMap<NodeIndex, LoadState>,
    stack: Vec<NodeIndex>,
    files: Vec<ResolvedFile>,
    /// Recoverable per-file diagnostics (lexical and syntax errors).
    file_errors: Vec<ParseError>,
}

impl<'a> Loader<'a> {
    pub(crate) fn new(config: &'a Config) -> Loader<'a> {
        Loader {
            config,
            graph: Graph::new(),
            index: HashMap::new(),
            state: HashMap::new(),
            stack: Vec::new(),
            files: Vec::new(),
            file_errors: Vec::new(),
        }
    }

    /// The loaded files in topological order, plus accumulated per-file
    /// diagnostics.
    pub(crate) fn finish(self) -> (Vec<ResolvedFile>, Vec<ParseError>) {
        (self.files, self.file_errors)
    }

    fn get_or_insert_index(&mut self, path: &Path) -> NodeIndex {
        let Loader {
            ref mut index,
            ref mut graph,
            ..
        } = *self;
        *index
            .entry(path.to_path_buf())
            .or_insert_with(|| graph.add_node(path.to_path_buf()))
    }

    /// Loads `path`, which must already be resolved to an absolute or
    /// stub-virtual location.
    pub(crate) fn load(&mut self, path: &Path) -> Result<(), ParseError> {
        let node = self.get_or_insert_index(path);
        if let Some(&parent) = self.stack.last() {
            self.graph.add_edge(parent, node, ());
        }
        match self.state.get(&node) {
            Some(LoadState::Loaded) => {
                trace!("already loaded: {}", path.display());
                return Ok(());
            }
            Some(LoadState::Loading) => {
                let start = self
                    .stack
                    .iter()
                    .position(|&ix| ix == node)
                    .unwrap_or_default();
                let cycle = self.stack[start..]
                    .iter()
                    .map(|&ix| self.graph[ix].clone())
                    .collect();
                return Err(ParseError::CircularDependency(cycle));
            }
            None => {}
        }

        if self.stack.len() as u32 >= self.config.max_depth {
            return Err(ParseError::Dependency {
                error: ResolveError::MaxDepthExceeded(self.config.max_depth),
                import: path.display().to_string(),
            });
        }

        debug!("loading {}", path.display());
        let source = self.read_source(path)?;
        self.state.insert(node, LoadState::Loading);
        self.stack.push(node);
        let result = self.load_contents(path, &source);
        self.stack.pop();
        self.state.insert(node, LoadState::Loaded);
        result
    }

    fn read_source(&self, path: &Path) -> Result<String, ParseError> {
        if self.config.file_source.file_exists(path) {
            return self.config.file_source.read_file(path).map_err(|error| {
                ParseError::Dependency {
                    error: ResolveError::Io(error),
                    import: path.display().to_string(),
                }
            });
        }
        if self.config.recognize_well_known_types {
            if let Some(stub) = well_known_stub(path) {
                trace!("synthesizing well-known stub for {}", path.display());
                return Ok(stub.to_string());
            }
        }
        Err(ParseError::Dependency {
            error: ResolveError::ImportNotFound(path.display().to_string()),
            import: path.display().to_string(),
        })
    }

    fn load_contents(&mut self, path: &Path, source: &str) -> Result<(), ParseError> {
        let tokens = match lexer::tokenize(source) {
            Ok(tokens) => tokens,
            Err(error) => {
                // Tokenization failures are fatal to this file; the rest of
                // the graph still loads.
                self.file_errors.push(ParseError::Lexical {
                    error,
                    file: path.to_path_buf(),
                });
                return Ok(());
            }
        };
        let (ast, syntax_errors) = parser::parse(tokens);
        self.file_errors
            .extend(syntax_errors.into_iter().map(|error| ParseError::Syntax {
                error,
                file: path.to_path_buf(),
            }));

        let mut imports = Vec::new();
        for import in &ast.imports {
            match self.locate_import(&import.path)? {
                Some(target) => {
                    self.load(&target)?;
                    imports.push(target);
                }
                None => {
                    warn!(
                        "{}: import {:?} not found on any import path; skipping",
                        path.display(),
                        import.path
                    );
                }
            }
        }

        self.files.push(ResolvedFile {
            path: path.to_path_buf(),
            package: extract_package(source).or_else(|| ast.package.clone()),
            is_well_known: is_well_known_path(path),
            imports,
            ast,
        });
        Ok(())
    }

    /// Finds the file an import statement refers to.
    ///
    /// Search order: the path as-is if absolute, each import path in
    /// declaration order, then the well-known stub registry. `Ok(None)`
    /// means the import is missing but demoted to a warning.
    fn locate_import(&self, import: &str) -> Result<Option<PathBuf>, ParseError> {
        if import.is_empty() {
            return Err(ParseError::Dependency {
                error: ResolveError::InvalidPath(PathBuf::new()),
                import: import.to_string(),
            });
        }
        let relative = Path::new(import);
        if let Some(found) = self
            .config
            .file_source
            .resolve_path(relative, &self.config.import_paths)
        {
            trace!("import {:?} found at {}", import, found.display());
            return Ok(Some(found));
        }
        if self.config.recognize_well_known_types && well_known_stub(relative).is_some() {
            return Ok(Some(relative.to_path_buf()));
        }
        if self.config.allow_missing_imports {
            return Ok(None);
        }
        Err(ParseError::Dependency {
            error: ResolveError::ImportNotFound(import.to_string()),
            import: import.to_string(),
        })
    }
}

fn well_known_stub(path: &Path) -> Option<&'static str> {
    let key = path.to_string_lossy().replace('\\', "/");
    WELL_KNOWN_STUBS.get(key.as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn memory_config(files: &[(&str, &str)]) -> Config {
        let mut source = MemoryFileSource::new();
        for (path, contents) in files {
            source.insert(*path, *contents);
        }
        let mut config = Config::new();
        config.file_source(source);
        config
    }

    fn load(config: &Config, root: &str) -> Result<(Vec<ResolvedFile>, Vec<ParseError>), ParseError> {
        let mut loader = Loader::new(config);
        loader.load(Path::new(root))?;
        Ok(loader.finish())
    }

    #[test]
    fn topological_order_dependencies_first() {
        let config = memory_config(&[
            (
                "main.proto",
                "syntax = \"proto3\"; import \"a.proto\"; import \"b.proto\";",
            ),
            ("a.proto", "syntax = \"proto3\"; import \"c.proto\";"),
            ("b.proto", "syntax = \"proto3\"; import \"c.proto\";"),
            ("c.proto", "syntax = \"proto3\";"),
        ]);
        let (files, errors) = load(&config, "main.proto").unwrap();
        assert!(errors.is_empty());
        let order: Vec<_> = files
            .iter()
            .map(|file| file.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(order, vec!["c.proto", "a.proto", "b.proto", "main.proto"]);
        // The shared dependency is loaded exactly once.
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn cycle_is_detected_with_full_path() {
        let config = memory_config(&[
            ("a.proto", "syntax = \"proto3\"; import \"b.proto\";"),
            ("b.proto", "syntax = \"proto3\"; import \"a.proto\";"),
        ]);
        let error = load(&config, "a.proto").unwrap_err();
        match error {
            ParseError::CircularDependency(cycle) => {
                assert_eq!(
                    cycle,
                    vec![PathBuf::from("a.proto"), PathBuf::from("b.proto")]
                );
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_import_is_a_cycle() {
        let config = memory_config(&[(
            "a.proto",
            "syntax = \"proto3\"; import \"a.proto\";",
        )]);
        let error = load(&config, "a.proto").unwrap_err();
        match error {
            ParseError::CircularDependency(cycle) => {
                assert_eq!(cycle, vec![PathBuf::from("a.proto")]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_import_is_a_hard_failure_by_default() {
        let config = memory_config(&[(
            "main.proto",
            "syntax = \"proto3\"; import \"gone.proto\";",
        )]);
        let error = load(&config, "main.proto").unwrap_err();
        match error {
            ParseError::Dependency {
                error: ResolveError::ImportNotFound(import),
                ..
            } => assert_eq!(import, "gone.proto"),
            other => panic!("expected ImportNotFound, got {other:?}"),
        }
    }

    #[test]
    fn missing_import_demoted_when_allowed() {
        let mut config = memory_config(&[(
            "main.proto",
            "syntax = \"proto3\"; import \"gone.proto\";",
        )]);
        config.allow_missing_imports(true);
        let (files, errors) = load(&config, "main.proto").unwrap();
        assert!(errors.is_empty());
        assert_eq!(files.len(), 1);
        assert!(files[0].imports.is_empty());
    }

    #[test]
    fn well_known_imports_synthesize_stubs() {
        let config = memory_config(&[(
            "main.proto",
            "syntax = \"proto3\"; import \"google/protobuf/empty.proto\";",
        )]);
        let (files, errors) = load(&config, "main.proto").unwrap();
        assert!(errors.is_empty());
        assert_eq!(files.len(), 2);
        let stub = &files[0];
        assert!(stub.is_well_known);
        assert_eq!(stub.package.as_deref(), Some("google.protobuf"));
        assert_eq!(stub.ast.messages[0].name, "Empty");
    }

    #[test]
    fn disk_files_win_over_stubs() {
        let config = memory_config(&[
            (
                "main.proto",
                "syntax = \"proto3\"; import \"google/protobuf/empty.proto\";",
            ),
            (
                "google/protobuf/empty.proto",
                "syntax = \"proto3\"; package google.protobuf; message Empty { bool marker = 1; }",
            ),
        ]);
        let (files, _) = load(&config, "main.proto").unwrap();
        assert_eq!(files[0].ast.messages[0].fields.len(), 1);
    }

    #[test]
    fn every_stub_parses_cleanly() {
        for (path, _) in WELL_KNOWN_STUBS.iter() {
            let main = format!("syntax = \"proto3\"; import \"{path}\";");
            let config = memory_config(&[("main.proto", main.as_str())]);
            let (files, errors) = load(&config, "main.proto").unwrap();
            assert!(errors.is_empty(), "{path}: {errors:?}");
            assert_eq!(files.len(), 2, "{path}");
        }
    }

    #[test]
    fn max_depth_is_enforced() {
        let config = memory_config(&[
            ("a.proto", "syntax = \"proto3\"; import \"b.proto\";"),
            ("b.proto", "syntax = \"proto3\"; import \"c.proto\";"),
            ("c.proto", "syntax = \"proto3\";"),
        ]);
        let mut limited = memory_config(&[
            ("a.proto", "syntax = \"proto3\"; import \"b.proto\";"),
            ("b.proto", "syntax = \"proto3\"; import \"c.proto\";"),
            ("c.proto", "syntax = \"proto3\";"),
        ]);
        limited.max_depth(2);

        assert!(load(&config, "a.proto").is_ok());
        let error = load(&limited, "a.proto").unwrap_err();
        assert!(matches!(
            error,
            ParseError::Dependency {
                error: ResolveError::MaxDepthExceeded(2),
                ..
            }
        ));
    }

    #[test]
    fn lexical_failure_elides_the_file() {
        let config = memory_config(&[
            ("main.proto", "syntax = \"proto3\"; import \"bad.proto\";"),
            ("bad.proto", "syntax = \"proto3\"; message M { string s = \"unterminated }"),
        ]);
        let (files, errors) = load(&config, "main.proto").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ParseError::Lexical { .. }));
    }

    #[test]
    fn package_prefilter() {
        assert_eq!(
            extract_package("syntax = \"proto3\";\npackage a.b.v1;\n"),
            Some("a.b.v1".to_string())
        );
        assert_eq!(
            extract_package("  package   spaced ;"),
            Some("spaced".to_string())
        );
        assert_eq!(extract_package("message M {}"), None);
    }

    #[test]
    fn import_search_path_order() {
        let mut source = MemoryFileSource::new();
        source.insert("first/shared.proto", "syntax = \"proto3\"; package one;");
        source.insert("second/shared.proto", "syntax = \"proto3\"; package two;");
        source.insert("main.proto", "syntax = \"proto3\"; import \"shared.proto\";");
        let mut config = Config::new();
        config.file_source(source);
        config.import_path("first").import_path("second");

        let (files, _) = load(&config, "main.proto").unwrap();
        assert_eq!(files[0].path, PathBuf::from("first/shared.proto"));
        assert_eq!(files[0].package.as_deref(), Some("one"));
    }
}
