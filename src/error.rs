//! Error types for the proto3 compiler front end.
//!
//! Three orthogonal taxonomies cover the pipeline: lexical errors (fatal to
//! the file being tokenized), syntactic errors (recoverable, the parser
//! synchronizes and continues), and semantic errors (accumulated by the
//! resolver). [`ParseError`] is the public sum over all of them, carrying the
//! originating file path when known, and rendering as
//! `path:line:column: message`.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::lexer::Position;

/// A lexical error.
///
/// Tokenization failures are fatal to the file: parsing does not proceed on
/// a source whose token stream could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    kind: LexErrorKind,
    position: Position,
}

impl LexError {
    pub(crate) fn new(kind: LexErrorKind, position: Position) -> LexError {
        LexError { kind, position }
    }

    pub fn kind(&self) -> &LexErrorKind {
        &self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

/// The cause of a [`LexError`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LexErrorKind {
    /// A character outside the lexical grammar.
    UnexpectedCharacter(char),
    /// A backslash escape in a string literal that is not one of the
    /// supported C-style escapes.
    InvalidEscape(char),
    /// A string literal with no closing quote on its line.
    UnterminatedString,
    /// A `/*` block comment with no closing `*/`.
    UnterminatedComment,
    /// A numeric literal that does not fit the literal grammar, such as an
    /// octal literal with a `9` digit or an integer overflowing `i64`.
    InvalidNumericLiteral(String),
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LexErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character {c:?}"),
            LexErrorKind::InvalidEscape(c) => write!(f, "invalid escape sequence \\{c}"),
            LexErrorKind::UnterminatedString => f.write_str("unterminated string literal"),
            LexErrorKind::UnterminatedComment => f.write_str("unterminated block comment"),
            LexErrorKind::InvalidNumericLiteral(text) => {
                write!(f, "invalid numeric literal {text:?}")
            }
        }
    }
}

impl Error for LexError {}

/// A syntactic error.
///
/// The parser records a `SyntaxError`, synchronizes to the next recovery
/// point, and continues, so a single parse may report several of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    kind: SyntaxErrorKind,
    position: Position,
}

impl SyntaxError {
    pub(crate) fn new(kind: SyntaxErrorKind, position: Position) -> SyntaxError {
        SyntaxError { kind, position }
    }

    pub fn kind(&self) -> &SyntaxErrorKind {
        &self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

/// The cause of a [`SyntaxError`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyntaxErrorKind {
    /// The token at the cursor does not fit the grammar.
    UnexpectedToken {
        /// Human description of what the grammar allowed here.
        expected: String,
        /// Rendering of the token actually found.
        found: String,
    },
    /// The token stream ended inside a declaration.
    UnexpectedEof { expected: String },
    /// The `syntax` declaration names a version other than `"proto3"` or
    /// `"proto2"`.
    InvalidSyntaxVersion(String),
    /// The first non-ignorable construct in the file is not a `syntax`
    /// declaration.
    MissingSyntaxDeclaration,
    /// A second `package` declaration in one file.
    DuplicatePackage,
    /// An `extend` target outside the `google.protobuf` namespace.
    InvalidExtendTarget(String),
    /// A field inside an `extend` block without an explicit `optional`.
    MissingFieldLabel(String),
    /// A `repeated` or `optional` label on a field inside a `oneof`.
    UnexpectedFieldLabel(String),
    /// An internal invariant violation, reported instead of panicking.
    Internal(String),
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SyntaxErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            SyntaxErrorKind::UnexpectedEof { expected } => {
                write!(f, "expected {expected}, found end of input")
            }
            SyntaxErrorKind::InvalidSyntaxVersion(version) => {
                write!(f, "unrecognized syntax version {version:?}")
            }
            SyntaxErrorKind::MissingSyntaxDeclaration => {
                f.write_str("file must begin with a syntax declaration")
            }
            SyntaxErrorKind::DuplicatePackage => f.write_str("duplicate package declaration"),
            SyntaxErrorKind::InvalidExtendTarget(target) => {
                write!(
                    f,
                    "extend target {target:?} is not in the google.protobuf namespace"
                )
            }
            SyntaxErrorKind::MissingFieldLabel(field) => {
                write!(f, "extend field {field:?} must be declared optional")
            }
            SyntaxErrorKind::UnexpectedFieldLabel(label) => {
                write!(f, "oneof fields may not be declared {label}")
            }
            SyntaxErrorKind::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl Error for SyntaxError {}

/// A semantic error, produced by symbol resolution and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    kind: SemanticErrorKind,
    file: Option<PathBuf>,
    position: Position,
}

impl SemanticError {
    pub(crate) fn new(kind: SemanticErrorKind, position: Position) -> SemanticError {
        SemanticError {
            kind,
            file: None,
            position,
        }
    }

    pub(crate) fn with_file(mut self, file: &Path) -> SemanticError {
        self.file = Some(file.to_path_buf());
        self
    }

    pub fn kind(&self) -> &SemanticErrorKind {
        &self.kind
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

/// The cause of a [`SemanticError`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SemanticErrorKind {
    /// Two declarations produced the same fully-qualified name.
    DuplicateSymbol(String),
    /// A type reference that did not resolve to any declared symbol.
    UnresolvedType(String),
    /// A field number outside `[1, 536_870_911]`.
    FieldNumberOutOfRange { field: String, number: i32 },
    /// A field number inside the reserved band `[19000, 19999]`.
    FieldNumberInReservedBand { field: String, number: i32 },
    /// A field number listed in the enclosing message's `reserved`
    /// statement.
    ReservedFieldNumber { field: String, number: i32 },
    /// A field number already used by another field of the same message.
    DuplicateFieldNumber { field: String, number: i32 },
    /// A field name already used in the same message.
    DuplicateFieldName(String),
    /// A field name listed in the enclosing message's `reserved` statement.
    ReservedFieldName(String),
    /// An enum with no values.
    EmptyEnum(String),
    /// An enum whose first declared value is not `0`.
    MissingEnumZeroValue(String),
    /// Two values of one enum sharing a name.
    DuplicateEnumValueName { enum_name: String, value: String },
    /// A map key type outside the integral and `string` scalars.
    InvalidMapKeyType(String),
    /// A map declared as the value type of another map.
    NestedMapValue(String),
    /// A package component that is not a bare identifier.
    InvalidPackageComponent(String),
    /// An `extend` target that resolved to something other than a message
    /// in the `google.protobuf` package.
    InvalidExtendTarget(String),
    /// An rpc input or output that resolved to something other than a
    /// message.
    InvalidRpcType { rpc: String, type_name: String },
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SemanticErrorKind::DuplicateSymbol(fqn) => {
                write!(f, "duplicate symbol {fqn:?}")
            }
            SemanticErrorKind::UnresolvedType(name) => {
                write!(f, "unresolved type reference {name:?}")
            }
            SemanticErrorKind::FieldNumberOutOfRange { field, number } => {
                write!(f, "field {field:?} has number {number} outside [1, 536870911]")
            }
            SemanticErrorKind::FieldNumberInReservedBand { field, number } => {
                write!(
                    f,
                    "field {field:?} has number {number} in the reserved band [19000, 19999]"
                )
            }
            SemanticErrorKind::ReservedFieldNumber { field, number } => {
                write!(f, "field {field:?} uses reserved number {number}")
            }
            SemanticErrorKind::DuplicateFieldNumber { field, number } => {
                write!(f, "field {field:?} reuses number {number}")
            }
            SemanticErrorKind::DuplicateFieldName(name) => {
                write!(f, "duplicate field name {name:?}")
            }
            SemanticErrorKind::ReservedFieldName(name) => {
                write!(f, "field name {name:?} is reserved")
            }
            SemanticErrorKind::EmptyEnum(name) => {
                write!(f, "enum {name:?} must declare at least one value")
            }
            SemanticErrorKind::MissingEnumZeroValue(name) => {
                write!(f, "first value of enum {name:?} must have number 0")
            }
            SemanticErrorKind::DuplicateEnumValueName { enum_name, value } => {
                write!(f, "enum {enum_name:?} declares value {value:?} twice")
            }
            SemanticErrorKind::InvalidMapKeyType(type_name) => {
                write!(f, "{type_name} is not a valid map key type")
            }
            SemanticErrorKind::NestedMapValue(field) => {
                write!(f, "map field {field:?} may not have a map value type")
            }
            SemanticErrorKind::InvalidPackageComponent(component) => {
                write!(f, "invalid package component {component:?}")
            }
            SemanticErrorKind::InvalidExtendTarget(name) => {
                write!(f, "extend target {name:?} is not a google.protobuf message")
            }
            SemanticErrorKind::InvalidRpcType { rpc, type_name } => {
                write!(f, "rpc {rpc:?} type {type_name:?} does not name a message")
            }
        }
    }
}

impl Error for SemanticError {}

/// An import resolution failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum ResolveError {
    /// An `import` target not found on any search path.
    ImportNotFound(String),
    /// The import graph contains a cycle; the payload lists each
    /// participating file once, in traversal order.
    CircularDependency(Vec<PathBuf>),
    /// Transitive import depth exceeded the configured maximum.
    MaxDepthExceeded(u32),
    /// An underlying filesystem failure.
    Io(io::Error),
    /// A path that could not be interpreted, such as one that is not valid
    /// UTF-8 where text is required.
    InvalidPath(PathBuf),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::ImportNotFound(import) => {
                write!(f, "import {import:?} was not found on any import path")
            }
            ResolveError::CircularDependency(cycle) => {
                write!(f, "import cycle detected: ")?;
                for (idx, path) in cycle.iter().enumerate() {
                    if idx != 0 {
                        f.write_str(" -> ")?;
                    }
                    write!(f, "{}", path.display())?;
                }
                Ok(())
            }
            ResolveError::MaxDepthExceeded(depth) => {
                write!(f, "transitive import depth exceeds the maximum of {depth}")
            }
            ResolveError::Io(error) => write!(f, "i/o failure: {error}"),
            ResolveError::InvalidPath(path) => write!(f, "invalid path {}", path.display()),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolveError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ResolveError {
    fn from(error: io::Error) -> ResolveError {
        ResolveError::Io(error)
    }
}

/// The public error type of the crate.
///
/// Every internal error kind is wrapped into a `ParseError` before reaching
/// the caller, together with the file it originated from when that is known.
#[derive(Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// The requested root file does not exist.
    FileNotFound(PathBuf),
    /// An import failed to resolve; carries the offending import path.
    Dependency {
        error: ResolveError,
        import: String,
    },
    /// The import graph contains a cycle.
    CircularDependency(Vec<PathBuf>),
    /// Tokenization of a file failed.
    Lexical { error: LexError, file: PathBuf },
    /// A file contained a syntax error.
    Syntax { error: SyntaxError, file: PathBuf },
    /// Symbol resolution or validation failed.
    Semantic(SemanticError),
    /// A filesystem failure outside import resolution.
    Io(io::Error),
}

impl ParseError {
    /// The file the error originated from, when known.
    pub fn file(&self) -> Option<&Path> {
        match self {
            ParseError::FileNotFound(path) => Some(path),
            ParseError::Lexical { file, .. } | ParseError::Syntax { file, .. } => Some(file),
            ParseError::Semantic(error) => error.file(),
            ParseError::Dependency { .. } | ParseError::CircularDependency(_) | ParseError::Io(_) => {
                None
            }
        }
    }

    /// The source position of the error, when it refers to a token.
    pub fn position(&self) -> Option<Position> {
        match self {
            ParseError::Lexical { error, .. } => Some(error.position()),
            ParseError::Syntax { error, .. } => Some(error.position()),
            ParseError::Semantic(error) => Some(error.position()),
            _ => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::FileNotFound(path) => {
                write!(f, "{}: file not found", path.display())
            }
            ParseError::Dependency { error, import } => {
                write!(f, "import {import:?}: {error}")
            }
            ParseError::CircularDependency(cycle) => {
                fmt::Display::fmt(&ResolveError::CircularDependency(cycle.clone()), f)
            }
            ParseError::Lexical { error, file } => {
                let position = error.position();
                write!(
                    f,
                    "{}:{}:{}: {error}",
                    file.display(),
                    position.line,
                    position.column
                )
            }
            ParseError::Syntax { error, file } => {
                let position = error.position();
                write!(
                    f,
                    "{}:{}:{}: {error}",
                    file.display(),
                    position.line,
                    position.column
                )
            }
            ParseError::Semantic(error) => {
                let position = error.position();
                match error.file() {
                    Some(file) => write!(
                        f,
                        "{}:{}:{}: {error}",
                        file.display(),
                        position.line,
                        position.column
                    ),
                    None => write!(f, "{}:{}: {error}", position.line, position.column),
                }
            }
            ParseError::Io(error) => write!(f, "i/o failure: {error}"),
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseError::Dependency { error, .. } => Some(error),
            ParseError::Lexical { error, .. } => Some(error),
            ParseError::Syntax { error, .. } => Some(error),
            ParseError::Semantic(error) => Some(error),
            ParseError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(error: io::Error) -> ParseError {
        ParseError::Io(error)
    }
}

impl From<SemanticError> for ParseError {
    fn from(error: SemanticError) -> ParseError {
        ParseError::Semantic(error)
    }
}
