//! The typed AST produced by the parser.
//!
//! One [`ProtoAst`] is produced per `.proto` file. Nodes own their names and
//! carry the [`Position`] of the token that introduced them; sibling order
//! matches source order. The tree is immutable after parsing, with one
//! exception: the resolver may rewrite [`FieldType::Message`] into
//! [`FieldType::Enum`] once enum declarations are known.

use std::fmt;

use crate::lexer::Position;

/// The declared protobuf language version.
///
/// `proto3` is the only canonical value; a `syntax = "proto2"` declaration is
/// normalized to proto3 processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtoVersion {
    #[default]
    Proto3,
}

/// A field cardinality label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldLabel {
    /// No label written in source.
    #[default]
    Singular,
    /// Explicit `optional`, with presence tracking.
    Optional,
    /// `repeated`.
    Repeated,
}

/// The fifteen proto3 scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    /// Looks up a scalar by its source spelling. Scalar names are not
    /// keywords, so this runs on plain identifiers.
    pub fn from_name(name: &str) -> Option<ScalarType> {
        let scalar = match name {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        };
        Some(scalar)
    }

    /// The source spelling of the scalar.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Whether the scalar may key a `map` field: the integral types,
    /// `bool`, and `string`. Never the floating types or `bytes`.
    pub fn is_valid_map_key(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bytes
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A field's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// A bare identifier reference, resolved after parsing. The resolver may
    /// reclassify it as [`FieldType::Enum`].
    Message(String),
    /// A bare identifier known to name an enum declared in the same file.
    /// Produced only by the post-parse reclassification pass.
    Enum(String),
    /// A dotted reference such as `google.protobuf.Timestamp`, preserved
    /// verbatim (including a leading dot if written).
    Qualified(String),
    /// `map<key, value>`. Key restrictions are enforced at validation time.
    Map(Box<FieldType>, Box<FieldType>),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(scalar) => scalar.fmt(f),
            FieldType::Message(name)
            | FieldType::Enum(name)
            | FieldType::Qualified(name) => f.write_str(name),
            FieldType::Map(key, value) => write!(f, "map<{key}, {value}>"),
        }
    }
}

/// Visibility modifier of an `import` statement.
///
/// Recognized and preserved, but not semantically distinct in this front
/// end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImportKind {
    #[default]
    Default,
    Public,
    Weak,
}

/// An `import` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// The import path exactly as written, e.g. `google/protobuf/empty.proto`.
    pub path: String,
    pub kind: ImportKind,
    pub position: Position,
}

/// The value of an option assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    /// Integer and floating literals both land here.
    Number(f64),
    Bool(bool),
    Identifier(String),
}

/// An `option` assignment, at file, declaration, or field level.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionNode {
    pub name: String,
    pub value: OptionValue,
    /// True when the name was written in parentheses (a custom option).
    pub is_custom: bool,
    pub position: Position,
}

/// A message field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: String,
    pub field_type: FieldType,
    pub number: i32,
    pub label: FieldLabel,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// A `oneof` group. Member fields are implicitly [`FieldLabel::Singular`].
#[derive(Debug, Clone, PartialEq)]
pub struct OneofNode {
    pub name: String,
    pub fields: Vec<FieldNode>,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// One value of an enum.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueNode {
    pub name: String,
    pub number: i32,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// An `enum` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumNode {
    pub name: String,
    pub values: Vec<EnumValueNode>,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// A `message` declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageNode {
    pub name: String,
    pub fields: Vec<FieldNode>,
    pub oneofs: Vec<OneofNode>,
    /// Nested message declarations.
    pub messages: Vec<MessageNode>,
    /// Nested enum declarations.
    pub enums: Vec<EnumNode>,
    pub options: Vec<OptionNode>,
    /// Reserved field numbers, with `a to b` ranges already expanded.
    pub reserved_numbers: Vec<i32>,
    pub reserved_names: Vec<String>,
    pub position: Position,
}

impl MessageNode {
    /// All fields declared in this message scope: direct fields followed by
    /// the fields of each oneof, in source order.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldNode> {
        self.fields
            .iter()
            .chain(self.oneofs.iter().flat_map(|oneof| oneof.fields.iter()))
    }
}

/// An `rpc` method.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNode {
    pub name: String,
    /// The input type name as written, possibly qualified.
    pub input_type: String,
    /// The output type name as written, possibly qualified.
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// A `service` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNode {
    pub name: String,
    pub rpcs: Vec<RpcNode>,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// An `extend` block. proto3 restricts the target to the `google.protobuf`
/// namespace and every field to the `optional` label.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendNode {
    /// The extended type, always a qualified name.
    pub extendee: String,
    pub fields: Vec<FieldNode>,
    pub options: Vec<OptionNode>,
    pub position: Position,
}

/// A parsed `.proto` file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtoAst {
    pub syntax: ProtoVersion,
    /// The dotted package name, if declared.
    pub package: Option<String>,
    /// Position of the `package` declaration, for diagnostics.
    pub package_position: Option<Position>,
    /// Imports in declaration order.
    pub imports: Vec<Import>,
    /// File-level options.
    pub options: Vec<OptionNode>,
    pub messages: Vec<MessageNode>,
    pub enums: Vec<EnumNode>,
    pub services: Vec<ServiceNode>,
    pub extends: Vec<ExtendNode>,
}
