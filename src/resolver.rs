//! Cross-file symbol resolution and proto3 validation.
//!
//! Resolution runs in two passes over the file set, which must arrive in
//! dependency-topological order. Pass A declares every named entity under
//! its fully-qualified name. Pass B resolves each reference site and applies
//! the proto3 language rules, accumulating [`SemanticError`]s without
//! stopping. The only AST mutation is the enum field-type reclassification
//! performed before declaration.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::trace;
use multimap::MultiMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{
    EnumNode, ExtendNode, FieldNode, FieldType, MessageNode, ProtoAst, ServiceNode,
};
use crate::error::{SemanticError, SemanticErrorKind};
use crate::import::ResolvedFile;
use crate::lexer::Position;
use crate::parser::{IMPLEMENTATION_RESERVED, MAX_FIELD_NUMBER};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// What a [`Symbol`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Message,
    Enum,
    Service,
    Field,
    EnumValue,
    Oneof,
    Rpc,
    ExtensionField,
}

/// One declared entity, keyed by its fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Dot-separated path from the package root, without a leading dot.
    pub fqn: String,
    pub kind: SymbolKind,
    /// The declaring file's package, if any.
    pub package: Option<String>,
    /// FQN of the enclosing declaration, `None` for top-level symbols.
    pub parent: Option<String>,
    /// For fields and extension fields, the declared number.
    pub field_number: Option<i32>,
    /// For extension fields, the FQN of the extended message.
    pub extended_type: Option<String>,
}

/// The fully-qualified-name table built across all loaded files.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    by_package: MultiMap<String, String>,
    by_extendee: MultiMap<String, String>,
}

impl SymbolTable {
    pub fn get(&self, fqn: &str) -> Option<&Symbol> {
        self.symbols.get(fqn)
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.symbols.contains_key(fqn)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All symbols declared directly or transitively inside `package`.
    pub fn package_symbols(&self, package: &str) -> impl Iterator<Item = &Symbol> {
        self.by_package
            .get_vec(package)
            .into_iter()
            .flatten()
            .filter_map(|fqn| self.symbols.get(fqn))
    }

    /// Extension fields declared against `extendee`.
    pub fn extensions_of(&self, extendee: &str) -> impl Iterator<Item = &Symbol> {
        self.by_extendee
            .get_vec(extendee)
            .into_iter()
            .flatten()
            .filter_map(|fqn| self.symbols.get(fqn))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Inserts `symbol`, reporting `false` on a fully-qualified-name clash.
    fn insert(&mut self, symbol: Symbol) -> bool {
        if self.symbols.contains_key(&symbol.fqn) {
            return false;
        }
        if let Some(package) = &symbol.package {
            self.by_package.insert(package.clone(), symbol.fqn.clone());
        }
        if let Some(extendee) = &symbol.extended_type {
            self.by_extendee.insert(extendee.clone(), symbol.fqn.clone());
        }
        self.symbols.insert(symbol.fqn.clone(), symbol);
        true
    }
}

/// Joins name path segments into an FQN, skipping empty segments.
fn join_fqn<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .join(".")
}

/// Rewrites `Message(name)` field types into `Enum(name)` for every bare
/// `name` that matches an enum declared anywhere in this file.
///
/// The enum name set is deliberately file-global rather than scoped, so an
/// unqualified reference to a nested enum of a sibling message is still
/// reclassified. `Qualified(_)` references are never rewritten.
pub(crate) fn reclassify_enum_field_types(ast: &mut ProtoAst) {
    let mut enum_names: HashSet<String> = ast
        .enums
        .iter()
        .map(|node| node.name.clone())
        .collect();
    for message in &ast.messages {
        collect_enum_names(message, &mut enum_names);
    }
    if enum_names.is_empty() {
        return;
    }

    for message in &mut ast.messages {
        reclassify_in_message(message, &enum_names);
    }
    for extend in &mut ast.extends {
        for field in &mut extend.fields {
            reclassify_type(&mut field.field_type, &enum_names);
        }
    }
}

fn collect_enum_names(message: &MessageNode, names: &mut HashSet<String>) {
    for node in &message.enums {
        names.insert(node.name.clone());
    }
    for nested in &message.messages {
        collect_enum_names(nested, names);
    }
}

fn reclassify_in_message(message: &mut MessageNode, enum_names: &HashSet<String>) {
    for field in &mut message.fields {
        reclassify_type(&mut field.field_type, enum_names);
    }
    for oneof in &mut message.oneofs {
        for field in &mut oneof.fields {
            reclassify_type(&mut field.field_type, enum_names);
        }
    }
    for nested in &mut message.messages {
        reclassify_in_message(nested, enum_names);
    }
}

fn reclassify_type(field_type: &mut FieldType, enum_names: &HashSet<String>) {
    match field_type {
        FieldType::Message(name) if enum_names.contains(name.as_str()) => {
            *field_type = FieldType::Enum(name.clone());
        }
        FieldType::Map(key, value) => {
            reclassify_type(key, enum_names);
            reclassify_type(value, enum_names);
        }
        _ => {}
    }
}

/// Resolves and validates `files`, which must be in dependency-topological
/// order. Returns the populated symbol table and all accumulated semantic
/// errors.
pub fn resolve(files: &mut [ResolvedFile]) -> (SymbolTable, Vec<SemanticError>) {
    for file in files.iter_mut() {
        reclassify_enum_field_types(&mut file.ast);
    }

    let mut resolver = Resolver {
        table: SymbolTable::default(),
        errors: Vec::new(),
    };
    for file in files.iter() {
        resolver.declare_file(file);
    }

    let packages_by_path: HashMap<PathBuf, Option<String>> = files
        .iter()
        .map(|file| (file.path.clone(), file.ast.package.clone()))
        .collect();
    for file in files.iter() {
        resolver.check_file(file, &packages_by_path);
    }

    (resolver.table, resolver.errors)
}

struct Resolver {
    table: SymbolTable,
    errors: Vec<SemanticError>,
}

impl Resolver {
    fn report(&mut self, file: &Path, kind: SemanticErrorKind, position: Position) {
        self.errors
            .push(SemanticError::new(kind, position).with_file(file));
    }

    // ------------------------------------------------------------------
    // Pass A: declaration.
    // ------------------------------------------------------------------

    fn declare_file(&mut self, file: &ResolvedFile) {
        let package = file.ast.package.clone();
        let prefix = package.clone().unwrap_or_default();
        trace!(
            "declaring symbols of {} (package {:?})",
            file.path.display(),
            package
        );

        for message in &file.ast.messages {
            self.declare_message(file, &prefix, &package, message);
        }
        for node in &file.ast.enums {
            self.declare_enum(file, &prefix, &package, node);
        }
        for service in &file.ast.services {
            self.declare_service(file, &prefix, &package, service);
        }
        for extend in &file.ast.extends {
            self.declare_extend(file, &prefix, &package, extend);
        }
    }

    fn declare(
        &mut self,
        file: &Path,
        symbol: Symbol,
        position: Position,
    ) {
        let fqn = symbol.fqn.clone();
        if !self.table.insert(symbol) {
            self.report(file, SemanticErrorKind::DuplicateSymbol(fqn), position);
        }
    }

    fn declare_message(
        &mut self,
        file: &ResolvedFile,
        prefix: &str,
        package: &Option<String>,
        message: &MessageNode,
    ) {
        let fqn = join_fqn([prefix, message.name.as_str()]);
        self.declare(
            &file.path,
            Symbol {
                fqn: fqn.clone(),
                kind: SymbolKind::Message,
                package: package.clone(),
                parent: (!prefix.is_empty()).then(|| prefix.to_string()),
                field_number: None,
                extended_type: None,
            },
            message.position,
        );

        for field in &message.fields {
            self.declare_field(file, &fqn, package, field, SymbolKind::Field, None);
        }
        for oneof in &message.oneofs {
            let oneof_fqn = join_fqn([fqn.as_str(), oneof.name.as_str()]);
            self.declare(
                &file.path,
                Symbol {
                    fqn: oneof_fqn,
                    kind: SymbolKind::Oneof,
                    package: package.clone(),
                    parent: Some(fqn.clone()),
                    field_number: None,
                    extended_type: None,
                },
                oneof.position,
            );
            // Oneof member fields live in the message scope, not the oneof.
            for field in &oneof.fields {
                self.declare_field(file, &fqn, package, field, SymbolKind::Field, None);
            }
        }
        for nested in &message.messages {
            self.declare_message(file, &fqn, package, nested);
        }
        for node in &message.enums {
            self.declare_enum(file, &fqn, package, node);
        }
    }

    fn declare_field(
        &mut self,
        file: &ResolvedFile,
        parent_fqn: &str,
        package: &Option<String>,
        field: &FieldNode,
        kind: SymbolKind,
        extended_type: Option<String>,
    ) {
        self.declare(
            &file.path,
            Symbol {
                fqn: join_fqn([parent_fqn, field.name.as_str()]),
                kind,
                package: package.clone(),
                parent: (!parent_fqn.is_empty()).then(|| parent_fqn.to_string()),
                field_number: Some(field.number),
                extended_type,
            },
            field.position,
        );
    }

    fn declare_enum(
        &mut self,
        file: &ResolvedFile,
        prefix: &str,
        package: &Option<String>,
        node: &EnumNode,
    ) {
        let fqn = join_fqn([prefix, node.name.as_str()]);
        self.declare(
            &file.path,
            Symbol {
                fqn: fqn.clone(),
                kind: SymbolKind::Enum,
                package: package.clone(),
                parent: (!prefix.is_empty()).then(|| prefix.to_string()),
                field_number: None,
                extended_type: None,
            },
            node.position,
        );
        for value in &node.values {
            self.declare(
                &file.path,
                Symbol {
                    fqn: join_fqn([fqn.as_str(), value.name.as_str()]),
                    kind: SymbolKind::EnumValue,
                    package: package.clone(),
                    parent: Some(fqn.clone()),
                    field_number: None,
                    extended_type: None,
                },
                value.position,
            );
        }
    }

    fn declare_service(
        &mut self,
        file: &ResolvedFile,
        prefix: &str,
        package: &Option<String>,
        service: &ServiceNode,
    ) {
        let fqn = join_fqn([prefix, service.name.as_str()]);
        self.declare(
            &file.path,
            Symbol {
                fqn: fqn.clone(),
                kind: SymbolKind::Service,
                package: package.clone(),
                parent: (!prefix.is_empty()).then(|| prefix.to_string()),
                field_number: None,
                extended_type: None,
            },
            service.position,
        );
        for rpc in &service.rpcs {
            self.declare(
                &file.path,
                Symbol {
                    fqn: join_fqn([fqn.as_str(), rpc.name.as_str()]),
                    kind: SymbolKind::Rpc,
                    package: package.clone(),
                    parent: Some(fqn.clone()),
                    field_number: None,
                    extended_type: None,
                },
                rpc.position,
            );
        }
    }

    fn declare_extend(
        &mut self,
        file: &ResolvedFile,
        prefix: &str,
        package: &Option<String>,
        extend: &ExtendNode,
    ) {
        let extendee = extend.extendee.trim_start_matches('.').to_string();
        for field in &extend.fields {
            self.declare_field(
                file,
                prefix,
                package,
                field,
                SymbolKind::ExtensionField,
                Some(extendee.clone()),
            );
        }
    }

    // ------------------------------------------------------------------
    // Pass B: resolution and validation.
    // ------------------------------------------------------------------

    fn check_file(
        &mut self,
        file: &ResolvedFile,
        packages_by_path: &HashMap<PathBuf, Option<String>>,
    ) {
        let mut import_packages: Vec<String> = Vec::new();
        for import in &file.imports {
            if let Some(Some(package)) = packages_by_path.get(import) {
                if !import_packages.contains(package) {
                    import_packages.push(package.clone());
                }
            }
        }
        let scope = Scope {
            file: &file.path,
            package: file.ast.package.clone(),
            import_packages,
            path: Vec::new(),
        };

        if let Some(package) = &file.ast.package {
            let position = file.ast.package_position.unwrap_or_default();
            for component in package.split('.') {
                if !IDENTIFIER.is_match(component) {
                    self.report(
                        &file.path,
                        SemanticErrorKind::InvalidPackageComponent(component.to_string()),
                        position,
                    );
                }
            }
        }

        for message in &file.ast.messages {
            self.check_message(message, &scope);
        }
        for node in &file.ast.enums {
            self.check_enum(node, &scope);
        }
        for service in &file.ast.services {
            self.check_service(service, &scope);
        }
        for extend in &file.ast.extends {
            self.check_extend(extend, &scope);
        }
    }

    fn check_message<'a>(&mut self, message: &'a MessageNode, scope: &Scope<'a>) {
        // Fields live in the message's own scope: a bare reference to a
        // type nested directly inside this message must resolve.
        let inner = scope.child(&message.name);

        let reserved_numbers: HashSet<i32> =
            message.reserved_numbers.iter().copied().collect();
        let reserved_names: HashSet<&str> = message
            .reserved_names
            .iter()
            .map(String::as_str)
            .collect();
        let mut seen_numbers: HashSet<i32> = HashSet::new();
        let mut seen_names: HashSet<&str> = HashSet::new();

        for field in message.all_fields() {
            self.check_field_number(field, &inner, |number| {
                if reserved_numbers.contains(&number) {
                    Some(SemanticErrorKind::ReservedFieldNumber {
                        field: field.name.clone(),
                        number,
                    })
                } else if !seen_numbers.insert(number) {
                    Some(SemanticErrorKind::DuplicateFieldNumber {
                        field: field.name.clone(),
                        number,
                    })
                } else {
                    None
                }
            });

            if reserved_names.contains(field.name.as_str()) {
                self.report(
                    inner.file,
                    SemanticErrorKind::ReservedFieldName(field.name.clone()),
                    field.position,
                );
            } else if !seen_names.insert(field.name.as_str()) {
                self.report(
                    inner.file,
                    SemanticErrorKind::DuplicateFieldName(field.name.clone()),
                    field.position,
                );
            }

            self.check_field_type(field, &inner);
        }

        for nested in &message.messages {
            self.check_message(nested, &inner);
        }
        for node in &message.enums {
            self.check_enum(node, &inner);
        }
    }

    /// Range and reserved-band checks, then the scope-specific `conflict`
    /// check. At most one error is reported per field number.
    fn check_field_number<F>(&mut self, field: &FieldNode, scope: &Scope<'_>, conflict: F)
    where
        F: FnOnce(i32) -> Option<SemanticErrorKind>,
    {
        let number = field.number;
        let kind = if !(1..=MAX_FIELD_NUMBER).contains(&number) {
            Some(SemanticErrorKind::FieldNumberOutOfRange {
                field: field.name.clone(),
                number,
            })
        } else if IMPLEMENTATION_RESERVED.contains(&number) {
            Some(SemanticErrorKind::FieldNumberInReservedBand {
                field: field.name.clone(),
                number,
            })
        } else {
            conflict(number)
        };
        if let Some(kind) = kind {
            self.report(scope.file, kind, field.position);
        }
    }

    fn check_field_type(&mut self, field: &FieldNode, scope: &Scope<'_>) {
        match &field.field_type {
            FieldType::Scalar(_) => {}
            FieldType::Map(key, value) => {
                match key.as_ref() {
                    FieldType::Scalar(scalar) if scalar.is_valid_map_key() => {}
                    other => {
                        self.report(
                            scope.file,
                            SemanticErrorKind::InvalidMapKeyType(other.to_string()),
                            field.position,
                        );
                    }
                }
                match value.as_ref() {
                    FieldType::Map(..) => {
                        self.report(
                            scope.file,
                            SemanticErrorKind::NestedMapValue(field.name.clone()),
                            field.position,
                        );
                    }
                    FieldType::Scalar(_) => {}
                    other => self.check_type_reference(other, field.position, scope),
                }
            }
            other => self.check_type_reference(other, field.position, scope),
        }
    }

    fn check_type_reference(
        &mut self,
        field_type: &FieldType,
        position: Position,
        scope: &Scope<'_>,
    ) {
        let name = type_name(field_type);
        if self.lookup(name, scope).is_some() {
            return;
        }
        // Reclassified enum references were matched against the enums
        // declared in this file, including nested enums of sibling
        // messages; those resolve even when the scope chain alone would
        // not reach them.
        if matches!(field_type, FieldType::Enum(_)) {
            trace!("accepting file-local enum reference {name:?}");
            return;
        }
        self.report(
            scope.file,
            SemanticErrorKind::UnresolvedType(name.to_string()),
            position,
        );
    }

    /// Resolves `name` from `scope` and returns its FQN.
    ///
    /// Dotted names try scope-relative prefixes before being taken as fully
    /// qualified; a leading dot forces the fully-qualified reading.
    /// Unqualified names search outward: the innermost message scope, each
    /// enclosing message, the current package, then the top-level types of
    /// directly imported packages.
    fn lookup(&self, name: &str, scope: &Scope<'_>) -> Option<String> {
        if let Some(absolute) = name.strip_prefix('.') {
            return self.table.contains(absolute).then(|| absolute.to_string());
        }

        let package = scope.package.as_deref().unwrap_or_default();
        // Innermost scope outward.
        for depth in (0..=scope.path.len()).rev() {
            let candidate = join_fqn(
                std::iter::once(package)
                    .chain(scope.path[..depth].iter().copied())
                    .chain(std::iter::once(name)),
            );
            if self.table.contains(&candidate) {
                return Some(candidate);
            }
        }
        // The name taken as already fully qualified.
        if self.table.contains(name) {
            return Some(name.to_string());
        }
        // Top-level types of directly imported packages.
        if !name.contains('.') {
            for import_package in &scope.import_packages {
                let candidate = join_fqn([import_package.as_str(), name]);
                if self.table.contains(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn check_enum(&mut self, node: &EnumNode, scope: &Scope<'_>) {
        match node.values.first() {
            None => {
                self.report(
                    scope.file,
                    SemanticErrorKind::EmptyEnum(node.name.clone()),
                    node.position,
                );
            }
            Some(first) if first.number != 0 => {
                self.report(
                    scope.file,
                    SemanticErrorKind::MissingEnumZeroValue(node.name.clone()),
                    node.position,
                );
            }
            Some(_) => {}
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for value in &node.values {
            if !seen.insert(value.name.as_str()) {
                self.report(
                    scope.file,
                    SemanticErrorKind::DuplicateEnumValueName {
                        enum_name: node.name.clone(),
                        value: value.name.clone(),
                    },
                    value.position,
                );
            }
        }
    }

    fn check_service(&mut self, service: &ServiceNode, scope: &Scope<'_>) {
        for rpc in &service.rpcs {
            for type_name in [&rpc.input_type, &rpc.output_type] {
                match self.lookup(type_name, scope) {
                    None => self.report(
                        scope.file,
                        SemanticErrorKind::UnresolvedType(type_name.clone()),
                        rpc.position,
                    ),
                    Some(fqn) => {
                        let kind = self.table.get(&fqn).map(|symbol| symbol.kind);
                        if kind != Some(SymbolKind::Message) {
                            self.report(
                                scope.file,
                                SemanticErrorKind::InvalidRpcType {
                                    rpc: rpc.name.clone(),
                                    type_name: type_name.clone(),
                                },
                                rpc.position,
                            );
                        }
                    }
                }
            }
        }
    }

    fn check_extend(&mut self, extend: &ExtendNode, scope: &Scope<'_>) {
        match self.lookup(&extend.extendee, scope) {
            None => self.report(
                scope.file,
                SemanticErrorKind::UnresolvedType(extend.extendee.clone()),
                extend.position,
            ),
            Some(fqn) => {
                let symbol = self.table.get(&fqn);
                let is_option_message = symbol.is_some_and(|symbol| {
                    symbol.kind == SymbolKind::Message
                        && symbol.package.as_deref() == Some("google.protobuf")
                });
                if !is_option_message {
                    self.report(
                        scope.file,
                        SemanticErrorKind::InvalidExtendTarget(extend.extendee.clone()),
                        extend.position,
                    );
                }
            }
        }

        for field in &extend.fields {
            self.check_field_number(field, scope, |_| None);
            self.check_field_type(field, scope);
        }
    }
}

fn type_name(field_type: &FieldType) -> &str {
    match field_type {
        FieldType::Message(name) | FieldType::Enum(name) | FieldType::Qualified(name) => name,
        _ => "",
    }
}

/// The lexical environment of a reference site.
struct Scope<'a> {
    file: &'a Path,
    package: Option<String>,
    import_packages: Vec<String>,
    /// Enclosing message names, outermost first.
    path: Vec<&'a str>,
}

impl<'a> Scope<'a> {
    fn child(&self, name: &'a str) -> Scope<'a> {
        let mut path = self.path.clone();
        path.push(name);
        Scope {
            file: self.file,
            package: self.package.clone(),
            import_packages: self.import_packages.clone(),
            path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn file(name: &str, source: &str) -> ResolvedFile {
        let (ast, errors) = parse(tokenize(source).unwrap());
        assert_eq!(errors, Vec::new(), "syntax errors in test fixture");
        ResolvedFile {
            path: PathBuf::from(name),
            package: ast.package.clone(),
            ast,
            imports: Vec::new(),
            is_well_known: false,
        }
    }

    fn resolve_one(source: &str) -> (SymbolTable, Vec<SemanticError>) {
        let mut files = vec![file("test.proto", source)];
        resolve(&mut files)
    }

    fn kinds(errors: &[SemanticError]) -> Vec<&SemanticErrorKind> {
        errors.iter().map(|error| error.kind()).collect()
    }

    #[test]
    fn declares_nested_symbols() {
        let (table, errors) = resolve_one(
            "syntax = \"proto3\";\npackage a.b;\nmessage Outer {\n  message Inner { string id = 1; }\n  enum Kind { KIND_UNSPECIFIED = 0; }\n  Inner inner = 1;\n}\nservice S { rpc Get(Outer) returns (Outer); }\n",
        );
        assert_eq!(errors, Vec::new());
        for fqn in [
            "a.b.Outer",
            "a.b.Outer.Inner",
            "a.b.Outer.Inner.id",
            "a.b.Outer.Kind",
            "a.b.Outer.Kind.KIND_UNSPECIFIED",
            "a.b.S",
            "a.b.S.Get",
        ] {
            assert!(table.contains(fqn), "missing {fqn}");
        }
        assert_eq!(table.get("a.b.Outer").unwrap().kind, SymbolKind::Message);
        assert_eq!(
            table.get("a.b.Outer.Inner").unwrap().parent.as_deref(),
            Some("a.b.Outer")
        );
        assert_eq!(
            table.get("a.b.Outer.Inner.id").unwrap().field_number,
            Some(1)
        );
    }

    #[test]
    fn duplicate_symbols_across_files() {
        let mut files = vec![
            file("one.proto", "syntax = \"proto3\"; package p; message M {}"),
            file("two.proto", "syntax = \"proto3\"; package p; message M {}"),
        ];
        let (_, errors) = resolve(&mut files);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0].kind(),
            SemanticErrorKind::DuplicateSymbol("p.M".to_string())
        );
        assert_eq!(errors[0].file(), Some(Path::new("two.proto")));
    }

    #[test]
    fn field_number_boundaries() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { int32 lo = 1; int32 hi = 536870911; }",
        );
        assert_eq!(errors, Vec::new());

        let (_, errors) =
            resolve_one("syntax = \"proto3\"; message M { int32 zero = 0; }");
        assert!(matches!(
            errors[0].kind(),
            SemanticErrorKind::FieldNumberOutOfRange { number: 0, .. }
        ));

        let (_, errors) =
            resolve_one("syntax = \"proto3\"; message M { int32 big = 536870912; }");
        assert!(matches!(
            errors[0].kind(),
            SemanticErrorKind::FieldNumberOutOfRange { .. }
        ));

        for number in [19_000, 19_543, 19_999] {
            let (_, errors) = resolve_one(&format!(
                "syntax = \"proto3\"; message M {{ int32 x = {number}; }}"
            ));
            assert!(
                matches!(
                    errors[0].kind(),
                    SemanticErrorKind::FieldNumberInReservedBand { .. }
                ),
                "{number}"
            );
        }
        for number in [18_999, 20_000] {
            let (_, errors) = resolve_one(&format!(
                "syntax = \"proto3\"; message M {{ int32 x = {number}; }}"
            ));
            assert_eq!(errors, Vec::new(), "{number}");
        }
    }

    #[test]
    fn duplicate_field_number_and_name() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; package p; message M { int32 a = 1; int32 b = 1; }",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::DuplicateFieldNumber {
                field: "b".to_string(),
                number: 1,
            }]
        );

        // A duplicated name also collides as a symbol; the field-name check
        // itself fires exactly once.
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; package p; message M { int32 a = 1; string a = 2; }",
        );
        let name_conflicts = errors
            .iter()
            .filter(|error| {
                matches!(error.kind(), SemanticErrorKind::DuplicateFieldName(name) if name == "a")
            })
            .count();
        assert_eq!(name_conflicts, 1);
    }

    #[test]
    fn oneof_fields_share_the_message_scope() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { int32 a = 1; oneof o { string a = 2; } }",
        );
        assert!(errors
            .iter()
            .any(|error| matches!(error.kind(), SemanticErrorKind::DuplicateFieldName(_))));

        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { int32 a = 1; oneof o { string b = 1; } }",
        );
        assert!(errors
            .iter()
            .any(|error| matches!(error.kind(), SemanticErrorKind::DuplicateFieldNumber { .. })));
    }

    #[test]
    fn reserved_collisions() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { reserved 1 to 3, 5; reserved \"old\"; string x = 2; }",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::ReservedFieldNumber {
                field: "x".to_string(),
                number: 2,
            }]
        );

        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { reserved \"old\"; string old = 1; }",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::ReservedFieldName("old".to_string())]
        );
    }

    #[test]
    fn enum_rules() {
        let (_, errors) = resolve_one("syntax = \"proto3\"; enum E { FOO = 1; BAR = 2; }");
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::MissingEnumZeroValue("E".to_string())]
        );

        let (_, errors) = resolve_one("syntax = \"proto3\"; enum E {}");
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::EmptyEnum("E".to_string())]
        );

        // Zero present but not first still violates the first-value rule.
        let (_, errors) = resolve_one("syntax = \"proto3\"; enum E { A = 1; B = 0; }");
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::MissingEnumZeroValue("E".to_string())]
        );

        let (_, errors) =
            resolve_one("syntax = \"proto3\"; enum E { A = 0; A = 1; }");
        assert!(errors.iter().any(|error| matches!(
            error.kind(),
            SemanticErrorKind::DuplicateEnumValueName { .. }
        )));
    }

    #[test]
    fn map_key_rules() {
        let (_, errors) =
            resolve_one("syntax = \"proto3\"; message M { map<string, int32> m = 1; }");
        assert_eq!(errors, Vec::new());

        let (_, errors) =
            resolve_one("syntax = \"proto3\"; message M { map<float, int32> m = 1; }");
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::InvalidMapKeyType("float".to_string())]
        );

        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message M { map<int32, map<int32, int32>> m = 1; }",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::NestedMapValue("m".to_string())]
        );

        // Message keys are rejected, message values resolve normally.
        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; message Row {} message M { map<string, Row> m = 1; }",
        );
        assert_eq!(errors, Vec::new());
    }

    #[test]
    fn unqualified_resolution_searches_outward() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\";\npackage p;\nmessage Outer {\n  message Shared {}\n  message Mid {\n    Shared up = 1;\n    Local here = 2;\n    message Local {}\n  }\n  Top top = 1;\n}\nmessage Top {}\n",
        );
        assert_eq!(errors, Vec::new());
    }

    #[test]
    fn unresolved_reference_is_reported() {
        let (_, errors) =
            resolve_one("syntax = \"proto3\"; message M { Missing x = 1; }");
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::UnresolvedType("Missing".to_string())]
        );
    }

    #[test]
    fn qualified_resolution() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\";\npackage p;\nmessage A { message B {} }\nmessage M {\n  p.A.B one = 1;\n  A.B two = 2;\n  .p.A three = 3;\n}\n",
        );
        assert_eq!(errors, Vec::new());

        let (_, errors) = resolve_one(
            "syntax = \"proto3\"; package p; message M { .missing.Name x = 1; }",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::UnresolvedType(".missing.Name".to_string())]
        );
    }

    #[test]
    fn resolution_across_imported_package() {
        let mut files = vec![
            file(
                "dep.proto",
                "syntax = \"proto3\"; package dep; message Payload {}",
            ),
            file(
                "main.proto",
                "syntax = \"proto3\"; package main; message M { Payload p = 1; dep.Payload q = 2; }",
            ),
        ];
        files[1].imports = vec![PathBuf::from("dep.proto")];
        let (_, errors) = resolve(&mut files);
        assert_eq!(errors, Vec::new());

        // Without the import edge the bare name does not leak into scope.
        let mut files = vec![
            file(
                "dep.proto",
                "syntax = \"proto3\"; package dep; message Payload {}",
            ),
            file(
                "main.proto",
                "syntax = \"proto3\"; package main; message M { Payload p = 1; }",
            ),
        ];
        let (_, errors) = resolve(&mut files);
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::UnresolvedType("Payload".to_string())]
        );
    }

    #[test]
    fn enum_reclassification_is_file_global() {
        let mut files = vec![file(
            "test.proto",
            "syntax = \"proto3\";\nmessage A { enum Color { COLOR_UNSPECIFIED = 0; } }\nmessage B {\n  Color c = 1;\n  map<string, Color> by_name = 2;\n  a.Color q = 3;\n}\nmessage a { enum Colour { X = 0; } }\n",
        )];
        reclassify_enum_field_types(&mut files[0].ast);
        let b = &files[0].ast.messages[1];
        assert_eq!(b.fields[0].field_type, FieldType::Enum("Color".to_string()));
        assert_eq!(
            b.fields[1].field_type,
            FieldType::Map(
                Box::new(FieldType::Scalar(crate::ast::ScalarType::String)),
                Box::new(FieldType::Enum("Color".to_string())),
            )
        );
        // Qualified references are never rewritten here.
        assert_eq!(
            b.fields[2].field_type,
            FieldType::Qualified("a.Color".to_string())
        );
    }

    #[test]
    fn rpc_types_must_be_messages() {
        let (_, errors) = resolve_one(
            "syntax = \"proto3\";\nmessage Req {}\nenum Bad { BAD_UNSPECIFIED = 0; }\nservice S {\n  rpc Ok(Req) returns (Req);\n  rpc Broken(Bad) returns (Req);\n}\n",
        );
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::InvalidRpcType {
                rpc: "Broken".to_string(),
                type_name: "Bad".to_string(),
            }]
        );
    }

    #[test]
    fn extend_targets_must_be_google_protobuf_messages() {
        let mut files = vec![
            file(
                "descriptor.proto",
                "syntax = \"proto3\"; package google.protobuf; message FieldOptions {}",
            ),
            file(
                "ext.proto",
                "syntax = \"proto3\"; package p; extend google.protobuf.FieldOptions { optional string tag = 50000; }",
            ),
        ];
        files[1].imports = vec![PathBuf::from("descriptor.proto")];
        let (table, errors) = resolve(&mut files);
        assert_eq!(errors, Vec::new());
        let extension = table.get("p.tag").unwrap();
        assert_eq!(extension.kind, SymbolKind::ExtensionField);
        assert_eq!(
            extension.extended_type.as_deref(),
            Some("google.protobuf.FieldOptions")
        );
        let indexed: Vec<_> = table
            .extensions_of("google.protobuf.FieldOptions")
            .map(|symbol| symbol.fqn.as_str())
            .collect();
        assert_eq!(indexed, vec!["p.tag"]);
    }

    #[test]
    fn extend_of_non_message_is_invalid() {
        let mut files = vec![
            file(
                "descriptor.proto",
                "syntax = \"proto3\"; package google.protobuf; enum FieldOptions { F = 0; }",
            ),
            file(
                "ext.proto",
                "syntax = \"proto3\"; package p; extend google.protobuf.FieldOptions { optional string tag = 50000; }",
            ),
        ];
        files[1].imports = vec![PathBuf::from("descriptor.proto")];
        let (_, errors) = resolve(&mut files);
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::InvalidExtendTarget(
                "google.protobuf.FieldOptions".to_string()
            )]
        );
    }

    #[test]
    fn invalid_package_components() {
        let mut files = vec![file("p.proto", "syntax = \"proto3\"; package ok.v1;")];
        let (_, errors) = resolve(&mut files);
        assert_eq!(errors, Vec::new());

        // A component that starts with a digit survives parsing only as part
        // of a crafted AST; the validator still rejects it.
        let mut bad = file("p.proto", "syntax = \"proto3\"; package ok;");
        bad.ast.package = Some("ok.1bad".to_string());
        let mut files = vec![bad];
        let (_, errors) = resolve(&mut files);
        assert_eq!(
            kinds(&errors),
            vec![&SemanticErrorKind::InvalidPackageComponent("1bad".to_string())]
        );
    }

    #[test]
    fn package_index() {
        let (table, errors) = resolve_one(
            "syntax = \"proto3\"; package p.q; message M {} enum E { E_UNSPECIFIED = 0; }",
        );
        assert_eq!(errors, Vec::new());
        let mut fqns: Vec<_> = table
            .package_symbols("p.q")
            .map(|symbol| symbol.fqn.clone())
            .collect();
        fqns.sort();
        assert_eq!(fqns, vec!["p.q.E", "p.q.E.E_UNSPECIFIED", "p.q.M"]);
    }
}
