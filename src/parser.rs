//! Recursive-descent parsing of a token stream into a [`ProtoAst`].
//!
//! The parser keeps a mutable cursor over the token stream and an error
//! accumulator. Every `parse_*` routine returns `Result`; recovery lives in
//! the enclosing loop, which records the error and synchronizes to the next
//! statement boundary before continuing. An AST is always produced, possibly
//! with declarations elided where recovery skipped material.

use log::debug;

use crate::ast::{
    EnumNode, EnumValueNode, ExtendNode, FieldLabel, FieldNode, FieldType, Import, ImportKind,
    MessageNode, OneofNode, OptionNode, OptionValue, ProtoAst, ProtoVersion, RpcNode, ScalarType,
    ServiceNode,
};
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::lexer::{Keyword, Position, Token, TokenKind};

/// Maximum legal field number, `2^29 - 1`.
pub const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// The band `[19000, 19999]` is reserved for the protobuf implementation.
pub const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<i32> = 19_000..=19_999;

/// Parses a token stream produced by [`crate::lexer::tokenize`].
///
/// The AST is always returned; the error list is non-empty if any syntactic
/// problem was detected.
pub fn parse(mut tokens: Vec<Token>) -> (ProtoAst, Vec<SyntaxError>) {
    if tokens.last().map_or(true, |token| token.kind != TokenKind::Eof) {
        let position = tokens.last().map(|token| token.position).unwrap_or_default();
        tokens.push(Token {
            kind: TokenKind::Eof,
            position,
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
    };
    let ast = parser.parse_file();
    (ast, parser.errors)
}

/// Where a field declaration appears, which decides label rules.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldContext {
    Message,
    Oneof,
    Extend,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    // ------------------------------------------------------------------
    // Cursor helpers. All lookahead skips ignorable tokens; the raw stream
    // (comments, whitespace) stays addressable through `self.tokens`.
    // ------------------------------------------------------------------

    fn skip_ignorable(&mut self) {
        while self
            .tokens
            .get(self.pos)
            .is_some_and(|token| token.kind.is_ignorable())
        {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> &Token {
        self.skip_ignorable();
        let idx = self.pos.min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn bump(&mut self) -> Token {
        self.skip_ignorable();
        let idx = self.pos.min(self.tokens.len() - 1);
        let token = self.tokens[idx].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&mut self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn unexpected(&mut self, expected: &str) -> SyntaxError {
        let token = self.peek().clone();
        let kind = if token.kind == TokenKind::Eof {
            SyntaxErrorKind::UnexpectedEof {
                expected: expected.to_string(),
            }
        } else {
            SyntaxErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: token.kind.describe(),
            }
        };
        SyntaxError::new(kind, token.position)
    }

    fn check_symbol(&mut self, symbol: char) -> bool {
        self.peek().kind == TokenKind::Symbol(symbol)
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.check_symbol(symbol) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<Position, SyntaxError> {
        if self.check_symbol(symbol) {
            Ok(self.bump().position)
        } else {
            Err(self.unexpected(&format!("`{symbol}`")))
        }
    }

    fn check_keyword(&mut self, keyword: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Position, SyntaxError> {
        if self.check_keyword(keyword) {
            Ok(self.bump().position)
        } else {
            Err(self.unexpected(&format!("`{}`", keyword.name())))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<(String, Position), SyntaxError> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                let position = self.bump().position;
                Ok((name, position))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_string(&mut self, expected: &str) -> Result<(String, Position), SyntaxError> {
        match self.peek().kind.clone() {
            TokenKind::StringLiteral(value) => {
                let position = self.bump().position;
                Ok((value, position))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_integer(&mut self, expected: &str) -> Result<(i64, Position), SyntaxError> {
        let negative = self.check_symbol('-');
        if negative {
            self.bump();
        }
        match self.peek().kind {
            TokenKind::IntegerLiteral(value) => {
                let position = self.bump().position;
                Ok((if negative { -value } else { value }, position))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    /// Reads an identifier or keyword as plain text. Used where the grammar
    /// is deliberately permissive: package components and declaration names
    /// that happen to collide with reserved words.
    fn name_component(&mut self) -> Option<(String, Position)> {
        let token = self.peek().clone();
        let text = match &token.kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::Keyword(keyword) => keyword.name().to_string(),
            TokenKind::BoolLiteral(value) => value.to_string(),
            _ => return None,
        };
        self.bump();
        Some((text, token.position))
    }

    // ------------------------------------------------------------------
    // Recovery.
    // ------------------------------------------------------------------

    /// Records `error` and advances to the next statement boundary: a `;`
    /// at the current nesting depth (consumed), a `}` closing the current
    /// scope (left for the caller), a keyword that starts a declaration at
    /// depth zero, or end of input. `start` is the cursor value before the
    /// failing parse began; if no net progress was made the cursor is
    /// force-advanced one token so recovery can never stall.
    fn recover(&mut self, error: SyntaxError, start: usize) {
        self.errors.push(error);
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Symbol('{') => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Symbol('}') => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    self.bump();
                }
                TokenKind::Symbol(';') if depth == 0 => {
                    self.bump();
                    break;
                }
                TokenKind::Keyword(
                    Keyword::Package
                    | Keyword::Import
                    | Keyword::Option
                    | Keyword::Message
                    | Keyword::Enum
                    | Keyword::Service
                    | Keyword::Extend
                    | Keyword::Rpc
                    | Keyword::Oneof
                    | Keyword::Reserved,
                ) if depth == 0 => break,
                _ => {
                    self.bump();
                }
            }
        }
        if self.pos == start && !self.at_eof() {
            self.pos += 1;
        }
    }

    /// Guards a body loop against a stuck cursor. Returns `false` when the
    /// loop must abort because even a forced advance made no progress.
    fn ensure_progress(&mut self, before: usize) -> bool {
        if self.pos > before {
            return true;
        }
        let error = SyntaxError::new(
            SyntaxErrorKind::Internal("parser cursor failed to advance".to_string()),
            self.peek().position,
        );
        self.errors.push(error);
        if self.at_eof() {
            false
        } else {
            self.pos += 1;
            true
        }
    }

    // ------------------------------------------------------------------
    // File structure.
    // ------------------------------------------------------------------

    fn parse_file(&mut self) -> ProtoAst {
        let mut ast = ProtoAst::default();
        self.parse_syntax_declaration(&mut ast);

        loop {
            let start = self.pos;
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Package) => {
                    match self.parse_package() {
                        Ok((package, position)) => {
                            if ast.package.is_some() {
                                self.errors.push(SyntaxError::new(
                                    SyntaxErrorKind::DuplicatePackage,
                                    position,
                                ));
                            } else {
                                ast.package = Some(package);
                                ast.package_position = Some(position);
                            }
                        }
                        Err(error) => self.recover(error, start),
                    }
                }
                TokenKind::Keyword(Keyword::Import) => match self.parse_import() {
                    Ok(import) => ast.imports.push(import),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => ast.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Message) => match self.parse_message() {
                    Ok(message) => ast.messages.push(message),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Enum) => match self.parse_enum() {
                    Ok(node) => ast.enums.push(node),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Service) => match self.parse_service() {
                    Ok(service) => ast.services.push(service),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Extend) => match self.parse_extend() {
                    Ok(extend) => ast.extends.push(extend),
                    Err(error) => self.recover(error, start),
                },
                _ => {
                    let error = self.unexpected("a top-level declaration");
                    self.recover(error, start);
                }
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        ast
    }

    /// `syntax = "proto3" ;`. Required as the first non-ignorable
    /// construct. `"proto2"` is accepted and normalized; any other version
    /// string is reported and processing proceeds as proto3.
    fn parse_syntax_declaration(&mut self, ast: &mut ProtoAst) {
        if !self.check_keyword(Keyword::Syntax) {
            let position = self.peek().position;
            self.errors.push(SyntaxError::new(
                SyntaxErrorKind::MissingSyntaxDeclaration,
                position,
            ));
            return;
        }
        let start = self.pos;
        let result: Result<(), SyntaxError> = (|| {
            self.expect_keyword(Keyword::Syntax)?;
            self.expect_symbol('=')?;
            let (version, position) = self.expect_string("a syntax version string")?;
            match version.as_str() {
                "proto3" => {}
                "proto2" => {
                    debug!("normalizing syntax = \"proto2\" to proto3 processing");
                }
                other => {
                    self.errors.push(SyntaxError::new(
                        SyntaxErrorKind::InvalidSyntaxVersion(other.to_string()),
                        position,
                    ));
                }
            }
            self.expect_symbol(';')?;
            Ok(())
        })();
        ast.syntax = ProtoVersion::Proto3;
        if let Err(error) = result {
            self.recover(error, start);
        }
    }

    /// `package a.b.c ;`. Keywords are allowed as components.
    fn parse_package(&mut self) -> Result<(String, Position), SyntaxError> {
        let position = self.expect_keyword(Keyword::Package)?;
        let mut components = Vec::new();
        loop {
            match self.name_component() {
                Some((component, _)) => components.push(component),
                None => return Err(self.unexpected("a package name component")),
            }
            if !self.eat_symbol('.') {
                break;
            }
        }
        self.expect_symbol(';')?;
        Ok((components.join("."), position))
    }

    /// `import [public | weak]? "path" ;`
    fn parse_import(&mut self) -> Result<Import, SyntaxError> {
        let position = self.expect_keyword(Keyword::Import)?;
        let kind = if self.eat_keyword(Keyword::Public) {
            ImportKind::Public
        } else if self.eat_keyword(Keyword::Weak) {
            ImportKind::Weak
        } else {
            ImportKind::Default
        };
        let (path, _) = self.expect_string("an import path string")?;
        self.expect_symbol(';')?;
        Ok(Import {
            path,
            kind,
            position,
        })
    }

    // ------------------------------------------------------------------
    // Options.
    // ------------------------------------------------------------------

    /// `option NAME = VALUE ;`
    fn parse_option_declaration(&mut self) -> Result<OptionNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Option)?;
        let option = self.parse_option_assignment(position)?;
        self.expect_symbol(';')?;
        Ok(option)
    }

    /// The `NAME = VALUE` part shared by option declarations and bracketed
    /// field options.
    fn parse_option_assignment(
        &mut self,
        position: Position,
    ) -> Result<OptionNode, SyntaxError> {
        let (name, is_custom) = self.parse_option_name()?;
        self.expect_symbol('=')?;
        let value = self.parse_option_value()?;
        Ok(OptionNode {
            name,
            value,
            is_custom,
            position,
        })
    }

    /// A bare dotted name, or a parenthesized dotted name (custom option),
    /// optionally followed by a `.suffix` path.
    fn parse_option_name(&mut self) -> Result<(String, bool), SyntaxError> {
        if self.eat_symbol('(') {
            let mut name = self.parse_dotted_name("a custom option name")?;
            self.expect_symbol(')')?;
            while self.check_symbol('.') {
                self.bump();
                let (component, _) = self.expect_identifier("an option name component")?;
                name.push('.');
                name.push_str(&component);
            }
            Ok((name, true))
        } else {
            let name = self.parse_dotted_name("an option name")?;
            Ok((name, false))
        }
    }

    fn parse_option_value(&mut self) -> Result<OptionValue, SyntaxError> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::StringLiteral(value) => {
                self.bump();
                OptionValue::String(value)
            }
            TokenKind::BoolLiteral(value) => {
                self.bump();
                OptionValue::Bool(value)
            }
            TokenKind::IntegerLiteral(value) => {
                self.bump();
                OptionValue::Number(value as f64)
            }
            TokenKind::FloatLiteral(value) => {
                self.bump();
                OptionValue::Number(value)
            }
            TokenKind::Identifier(name) => {
                self.bump();
                OptionValue::Identifier(name)
            }
            TokenKind::Symbol(sign @ ('-' | '+')) => {
                self.bump();
                let negative = sign == '-';
                match self.peek().kind.clone() {
                    TokenKind::IntegerLiteral(value) => {
                        self.bump();
                        OptionValue::Number(if negative { -(value as f64) } else { value as f64 })
                    }
                    TokenKind::FloatLiteral(value) => {
                        self.bump();
                        OptionValue::Number(if negative { -value } else { value })
                    }
                    // `inf` is an ordinary identifier until a sign forces a
                    // numeric reading.
                    TokenKind::Identifier(name) if name == "inf" => {
                        self.bump();
                        OptionValue::Number(if negative {
                            f64::NEG_INFINITY
                        } else {
                            f64::INFINITY
                        })
                    }
                    _ => return Err(self.unexpected("a numeric option value")),
                }
            }
            _ => return Err(self.unexpected("an option value")),
        };
        Ok(value)
    }

    /// `[ NAME = VALUE (, NAME = VALUE)* ]`
    fn parse_field_options(&mut self) -> Result<Vec<OptionNode>, SyntaxError> {
        let mut options = Vec::new();
        self.expect_symbol('[')?;
        loop {
            let position = self.peek().position;
            options.push(self.parse_option_assignment(position)?);
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(']')?;
        Ok(options)
    }

    // ------------------------------------------------------------------
    // Messages and fields.
    // ------------------------------------------------------------------

    fn parse_message(&mut self) -> Result<MessageNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Message)?;
        let (name, _) = self.expect_identifier("a message name")?;
        self.expect_symbol('{')?;

        let mut message = MessageNode {
            name,
            position,
            ..MessageNode::default()
        };
        loop {
            let start = self.pos;
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("message"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Message) => match self.parse_message() {
                    Ok(nested) => message.messages.push(nested),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Enum) => match self.parse_enum() {
                    Ok(nested) => message.enums.push(nested),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Oneof) => match self.parse_oneof() {
                    Ok(oneof) => message.oneofs.push(oneof),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => message.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Reserved) => match self.parse_reserved() {
                    Ok((numbers, names)) => {
                        message.reserved_numbers.extend(numbers);
                        message.reserved_names.extend(names);
                    }
                    Err(error) => self.recover(error, start),
                },
                _ => match self.parse_field(FieldContext::Message) {
                    Ok(field) => message.fields.push(field),
                    Err(error) => self.recover(error, start),
                },
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(message)
    }

    fn eof_in_body(&self, construct: &str) -> SyntaxError {
        let position = self
            .tokens
            .last()
            .map(|token| token.position)
            .unwrap_or_default();
        SyntaxError::new(
            SyntaxErrorKind::UnexpectedEof {
                expected: format!("`}}` closing the {construct}"),
            },
            position,
        )
    }

    /// `[repeated | optional]? TYPE NAME = NUMBER [OPTIONS]? ;`
    fn parse_field(&mut self, context: FieldContext) -> Result<FieldNode, SyntaxError> {
        let first = self.peek().clone();
        let mut label = FieldLabel::Singular;
        if self.eat_keyword(Keyword::Repeated) {
            label = FieldLabel::Repeated;
        } else if self.eat_keyword(Keyword::Optional) {
            label = FieldLabel::Optional;
        }

        match context {
            FieldContext::Oneof if label != FieldLabel::Singular => {
                // Flagged, then treated as the implicit singular the group
                // imposes on its members.
                let name = match label {
                    FieldLabel::Repeated => "repeated",
                    _ => "optional",
                };
                self.errors.push(SyntaxError::new(
                    SyntaxErrorKind::UnexpectedFieldLabel(name.to_string()),
                    first.position,
                ));
                label = FieldLabel::Singular;
            }
            _ => {}
        }

        let field_type = self.parse_field_type()?;
        let (name, position) = match self.name_component() {
            Some(name) => name,
            None => return Err(self.unexpected("a field name")),
        };
        if matches!(name.as_str(), "syntax" | "package" | "import") {
            return Err(SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken {
                    expected: "a field name".to_string(),
                    found: format!("`{name}`"),
                },
                position,
            ));
        }

        if context == FieldContext::Extend && label != FieldLabel::Optional {
            self.errors.push(SyntaxError::new(
                SyntaxErrorKind::MissingFieldLabel(name.clone()),
                first.position,
            ));
            label = FieldLabel::Optional;
        }

        self.expect_symbol('=')?;
        let (number, _) = self.expect_integer("a field number")?;
        let options = if self.check_symbol('[') {
            self.parse_field_options()?
        } else {
            Vec::new()
        };
        self.expect_symbol(';')?;

        Ok(FieldNode {
            name,
            field_type,
            number: clamp_to_i32(number),
            label,
            options,
            position,
        })
    }

    /// `map<K, V>`, a scalar name, a bare type name, or a dotted reference.
    fn parse_field_type(&mut self) -> Result<FieldType, SyntaxError> {
        if self.check_keyword(Keyword::Map) {
            self.bump();
            self.expect_symbol('<')?;
            let key = self.parse_field_type()?;
            self.expect_symbol(',')?;
            let value = self.parse_field_type()?;
            self.expect_symbol('>')?;
            return Ok(FieldType::Map(Box::new(key), Box::new(value)));
        }

        let leading_dot = self.check_symbol('.');
        if leading_dot {
            self.bump();
        }
        let (first, _) = self.expect_identifier("a field type")?;
        let mut name = String::new();
        if leading_dot {
            name.push('.');
        }
        name.push_str(&first);
        let mut dotted = leading_dot;
        while self.check_symbol('.') {
            self.bump();
            let (component, _) = self.expect_identifier("a type name component")?;
            name.push('.');
            name.push_str(&component);
            dotted = true;
        }

        if dotted {
            Ok(FieldType::Qualified(name))
        } else if let Some(scalar) = ScalarType::from_name(&name) {
            Ok(FieldType::Scalar(scalar))
        } else {
            Ok(FieldType::Message(name))
        }
    }

    /// A dotted identifier path, used by option names, rpc types, and
    /// extend targets.
    fn parse_dotted_name(&mut self, expected: &str) -> Result<String, SyntaxError> {
        let mut name = String::new();
        if self.check_symbol('.') {
            self.bump();
            name.push('.');
        }
        let (first, _) = self.expect_identifier(expected)?;
        name.push_str(&first);
        while self.check_symbol('.') {
            self.bump();
            let (component, _) = self.expect_identifier("a name component")?;
            name.push('.');
            name.push_str(&component);
        }
        Ok(name)
    }

    /// `oneof NAME { (option | field)* }`
    fn parse_oneof(&mut self) -> Result<OneofNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Oneof)?;
        let (name, _) = self.expect_identifier("a oneof name")?;
        self.expect_symbol('{')?;

        let mut oneof = OneofNode {
            name,
            fields: Vec::new(),
            options: Vec::new(),
            position,
        };
        loop {
            let start = self.pos;
            match self.peek().kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("oneof"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => oneof.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                _ => match self.parse_field(FieldContext::Oneof) {
                    Ok(field) => oneof.fields.push(field),
                    Err(error) => self.recover(error, start),
                },
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(oneof)
    }

    /// `reserved (N | N to M | "name") (, …)* ;`. Numeric ranges expand
    /// into the full integer set here.
    fn parse_reserved(&mut self) -> Result<(Vec<i32>, Vec<String>), SyntaxError> {
        self.expect_keyword(Keyword::Reserved)?;
        let mut numbers = Vec::new();
        let mut names = Vec::new();
        loop {
            match self.peek().kind.clone() {
                TokenKind::StringLiteral(name) => {
                    self.bump();
                    names.push(name);
                }
                TokenKind::IntegerLiteral(_) | TokenKind::Symbol('-') => {
                    let (from, _) = self.expect_integer("a reserved field number")?;
                    if self.eat_keyword(Keyword::To) {
                        let (to, _) = self.expect_integer("the end of the reserved range")?;
                        let (from, to) = (clamp_to_i32(from), clamp_to_i32(to));
                        numbers.extend(from..=to);
                    } else {
                        numbers.push(clamp_to_i32(from));
                    }
                }
                _ => return Err(self.unexpected("a reserved number or name")),
            }
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(';')?;
        Ok((numbers, names))
    }

    // ------------------------------------------------------------------
    // Enums.
    // ------------------------------------------------------------------

    fn parse_enum(&mut self) -> Result<EnumNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Enum)?;
        let (name, _) = self.expect_identifier("an enum name")?;
        self.expect_symbol('{')?;

        let mut node = EnumNode {
            name,
            values: Vec::new(),
            options: Vec::new(),
            position,
        };
        loop {
            let start = self.pos;
            match self.peek().kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("enum"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => node.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                _ => match self.parse_enum_value() {
                    Ok(value) => node.values.push(value),
                    Err(error) => self.recover(error, start),
                },
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(node)
    }

    /// `NAME = NUMBER [OPTIONS]? ;`. Negative numbers are legal for
    /// non-first values.
    fn parse_enum_value(&mut self) -> Result<EnumValueNode, SyntaxError> {
        let (name, position) = self.expect_identifier("an enum value name")?;
        self.expect_symbol('=')?;
        let (number, _) = self.expect_integer("an enum value number")?;
        let options = if self.check_symbol('[') {
            self.parse_field_options()?
        } else {
            Vec::new()
        };
        self.expect_symbol(';')?;
        Ok(EnumValueNode {
            name,
            number: clamp_to_i32(number),
            options,
            position,
        })
    }

    // ------------------------------------------------------------------
    // Services.
    // ------------------------------------------------------------------

    fn parse_service(&mut self) -> Result<ServiceNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Service)?;
        let (name, _) = self.expect_identifier("a service name")?;
        self.expect_symbol('{')?;

        let mut service = ServiceNode {
            name,
            rpcs: Vec::new(),
            options: Vec::new(),
            position,
        };
        loop {
            let start = self.pos;
            match self.peek().kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("service"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => service.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                TokenKind::Keyword(Keyword::Rpc) => match self.parse_rpc() {
                    Ok(rpc) => service.rpcs.push(rpc),
                    Err(error) => self.recover(error, start),
                },
                _ => {
                    let error = self.unexpected("`rpc`, `option`, or `}`");
                    self.recover(error, start);
                }
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(service)
    }

    /// `rpc NAME ([stream]? TYPE) returns ([stream]? TYPE) (; | { option* })`
    fn parse_rpc(&mut self) -> Result<RpcNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Rpc)?;
        let (name, _) = self.expect_identifier("an rpc name")?;

        self.expect_symbol('(')?;
        let client_streaming = self.eat_keyword(Keyword::Stream);
        let input_type = self.parse_dotted_name("an rpc input type")?;
        self.expect_symbol(')')?;

        self.expect_keyword(Keyword::Returns)?;
        self.expect_symbol('(')?;
        let server_streaming = self.eat_keyword(Keyword::Stream);
        let output_type = self.parse_dotted_name("an rpc output type")?;
        self.expect_symbol(')')?;

        let mut rpc = RpcNode {
            name,
            input_type,
            output_type,
            client_streaming,
            server_streaming,
            options: Vec::new(),
            position,
        };

        if self.eat_symbol(';') {
            return Ok(rpc);
        }
        self.expect_symbol('{')?;
        loop {
            let start = self.pos;
            match self.peek().kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("rpc"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => rpc.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                _ => {
                    let error = self.unexpected("`option` or `}`");
                    self.recover(error, start);
                }
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(rpc)
    }

    // ------------------------------------------------------------------
    // Extensions.
    // ------------------------------------------------------------------

    /// `extend google.protobuf.X { (option | optional field)* }`. proto3
    /// only permits extending option messages; an out-of-namespace target
    /// is reported but the body is still parsed so recovery stays local.
    fn parse_extend(&mut self) -> Result<ExtendNode, SyntaxError> {
        let position = self.expect_keyword(Keyword::Extend)?;
        let extendee = self.parse_dotted_name("an extend target")?;
        if !extendee.trim_start_matches('.').starts_with("google.protobuf.") {
            self.errors.push(SyntaxError::new(
                SyntaxErrorKind::InvalidExtendTarget(extendee.clone()),
                position,
            ));
        }
        self.expect_symbol('{')?;

        let mut extend = ExtendNode {
            extendee,
            fields: Vec::new(),
            options: Vec::new(),
            position,
        };
        loop {
            let start = self.pos;
            match self.peek().kind {
                TokenKind::Symbol('}') => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(self.eof_in_body("extend block"));
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.bump();
                }
                TokenKind::Keyword(Keyword::Option) => match self.parse_option_declaration() {
                    Ok(option) => extend.options.push(option),
                    Err(error) => self.recover(error, start),
                },
                _ => match self.parse_field(FieldContext::Extend) {
                    Ok(field) => extend.fields.push(field),
                    Err(error) => self.recover(error, start),
                },
            }
            if !self.ensure_progress(start) {
                break;
            }
        }
        Ok(extend)
    }
}

fn clamp_to_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse_source(source: &str) -> (ProtoAst, Vec<SyntaxError>) {
        parse(tokenize(source).unwrap())
    }

    fn parse_ok(source: &str) -> ProtoAst {
        let (ast, errors) = parse_source(source);
        assert_eq!(errors, Vec::new(), "unexpected syntax errors");
        ast
    }

    #[test]
    fn basic_message() {
        let ast = parse_ok(
            "syntax = \"proto3\";\npackage a.b;\nmessage M { string name = 1; int32 age = 2; }\n",
        );
        assert_eq!(ast.syntax, ProtoVersion::Proto3);
        assert_eq!(ast.package.as_deref(), Some("a.b"));
        assert_eq!(ast.messages.len(), 1);
        let message = &ast.messages[0];
        assert_eq!(message.name, "M");
        assert_eq!(message.fields.len(), 2);
        assert_eq!(message.fields[0].name, "name");
        assert_eq!(
            message.fields[0].field_type,
            FieldType::Scalar(ScalarType::String)
        );
        assert_eq!(message.fields[0].number, 1);
        assert_eq!(message.fields[0].label, FieldLabel::Singular);
        assert_eq!(message.fields[1].name, "age");
        assert_eq!(
            message.fields[1].field_type,
            FieldType::Scalar(ScalarType::Int32)
        );
        assert_eq!(message.fields[1].number, 2);
    }

    #[test]
    fn proto2_is_normalized() {
        let ast = parse_ok("syntax = \"proto2\"; message M {}");
        assert_eq!(ast.syntax, ProtoVersion::Proto3);
    }

    #[test]
    fn unknown_syntax_version_is_reported() {
        let (ast, errors) = parse_source("syntax = \"proto4\"; message M {}");
        assert_eq!(ast.messages.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0].kind(),
            SyntaxErrorKind::InvalidSyntaxVersion("proto4".to_string())
        );
    }

    #[test]
    fn missing_syntax_declaration() {
        let (ast, errors) = parse_source("message M {}");
        assert_eq!(ast.messages.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(*errors[0].kind(), SyntaxErrorKind::MissingSyntaxDeclaration);
    }

    #[test]
    fn duplicate_package() {
        let (ast, errors) = parse_source("syntax = \"proto3\"; package a; package b;");
        assert_eq!(ast.package.as_deref(), Some("a"));
        assert_eq!(errors.len(), 1);
        assert_eq!(*errors[0].kind(), SyntaxErrorKind::DuplicatePackage);
    }

    #[test]
    fn package_components_may_be_keywords() {
        let ast = parse_ok("syntax = \"proto3\"; package service.message.v1;");
        assert_eq!(ast.package.as_deref(), Some("service.message.v1"));
    }

    #[test]
    fn import_modifiers() {
        let ast = parse_ok(
            "syntax = \"proto3\";\nimport \"a.proto\";\nimport public \"b.proto\";\nimport weak \"c.proto\";\n",
        );
        let kinds: Vec<_> = ast.imports.iter().map(|import| import.kind).collect();
        assert_eq!(
            kinds,
            vec![ImportKind::Default, ImportKind::Public, ImportKind::Weak]
        );
        let paths: Vec<_> = ast.imports.iter().map(|import| import.path.as_str()).collect();
        assert_eq!(paths, vec!["a.proto", "b.proto", "c.proto"]);
    }

    #[test]
    fn file_and_field_options() {
        let ast = parse_ok(
            "syntax = \"proto3\";\noption java_package = \"com.example\";\noption (my.custom) = true;\nmessage M { int32 a = 1 [deprecated = true, (my.limit) = -5]; }\n",
        );
        assert_eq!(ast.options.len(), 2);
        assert_eq!(ast.options[0].name, "java_package");
        assert!(!ast.options[0].is_custom);
        assert_eq!(
            ast.options[0].value,
            OptionValue::String("com.example".to_string())
        );
        assert_eq!(ast.options[1].name, "my.custom");
        assert!(ast.options[1].is_custom);
        assert_eq!(ast.options[1].value, OptionValue::Bool(true));

        let field = &ast.messages[0].fields[0];
        assert_eq!(field.options.len(), 2);
        assert_eq!(field.options[0].name, "deprecated");
        assert_eq!(field.options[1].name, "my.limit");
        assert!(field.options[1].is_custom);
        assert_eq!(field.options[1].value, OptionValue::Number(-5.0));
    }

    #[test]
    fn custom_option_with_suffix() {
        let ast = parse_ok("syntax = \"proto3\"; option (my.ext).field = 7;");
        assert_eq!(ast.options[0].name, "my.ext.field");
        assert!(ast.options[0].is_custom);
        assert_eq!(ast.options[0].value, OptionValue::Number(7.0));
    }

    #[test]
    fn signed_infinity_option_value() {
        let ast = parse_ok("syntax = \"proto3\"; option threshold = -inf;");
        assert_eq!(
            ast.options[0].value,
            OptionValue::Number(f64::NEG_INFINITY)
        );
        // Unsigned `inf` stays an identifier.
        let ast = parse_ok("syntax = \"proto3\"; option threshold = inf;");
        assert_eq!(
            ast.options[0].value,
            OptionValue::Identifier("inf".to_string())
        );
    }

    #[test]
    fn reserved_ranges_expand() {
        let ast = parse_ok(
            "syntax = \"proto3\"; message M { reserved 1 to 3, 5; reserved \"old\"; string x = 4; }",
        );
        let message = &ast.messages[0];
        assert_eq!(message.reserved_numbers, vec![1, 2, 3, 5]);
        assert_eq!(message.reserved_names, vec!["old".to_string()]);
        assert_eq!(message.fields.len(), 1);
        assert_eq!(message.fields[0].number, 4);
    }

    #[test]
    fn nested_messages_and_enums() {
        let ast = parse_ok(
            "syntax = \"proto3\";\nmessage Outer {\n  message Inner { bytes data = 1; }\n  enum Kind { KIND_UNSPECIFIED = 0; KIND_A = 1; }\n  Inner inner = 1;\n  Kind kind = 2;\n}\n",
        );
        let outer = &ast.messages[0];
        assert_eq!(outer.messages[0].name, "Inner");
        assert_eq!(outer.enums[0].name, "Kind");
        assert_eq!(
            outer.fields[0].field_type,
            FieldType::Message("Inner".to_string())
        );
        assert_eq!(
            outer.fields[1].field_type,
            FieldType::Message("Kind".to_string())
        );
    }

    #[test]
    fn map_fields() {
        let ast = parse_ok("syntax = \"proto3\"; message M { map<string, int32> m = 1; }");
        assert_eq!(
            ast.messages[0].fields[0].field_type,
            FieldType::Map(
                Box::new(FieldType::Scalar(ScalarType::String)),
                Box::new(FieldType::Scalar(ScalarType::Int32)),
            )
        );
    }

    #[test]
    fn qualified_type_references() {
        let ast = parse_ok(
            "syntax = \"proto3\"; message M { google.protobuf.Timestamp at = 1; .a.b.C c = 2; }",
        );
        assert_eq!(
            ast.messages[0].fields[0].field_type,
            FieldType::Qualified("google.protobuf.Timestamp".to_string())
        );
        assert_eq!(
            ast.messages[0].fields[1].field_type,
            FieldType::Qualified(".a.b.C".to_string())
        );
    }

    #[test]
    fn keywords_allowed_as_field_names() {
        let ast = parse_ok(
            "syntax = \"proto3\"; message M { string option = 1; int32 stream = 2; bool to = 3; }",
        );
        let names: Vec<_> = ast.messages[0]
            .fields
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(names, vec!["option", "stream", "to"]);
    }

    #[test]
    fn forbidden_field_names_error() {
        for name in ["syntax", "package", "import"] {
            let (_, errors) =
                parse_source(&format!("syntax = \"proto3\"; message M {{ string {name} = 1; }}"));
            assert!(!errors.is_empty(), "{name} should not be a field name");
        }
    }

    #[test]
    fn oneof_fields_are_singular() {
        let ast = parse_ok(
            "syntax = \"proto3\"; message M { oneof payload { string text = 1; bytes raw = 2; } }",
        );
        let oneof = &ast.messages[0].oneofs[0];
        assert_eq!(oneof.name, "payload");
        assert_eq!(oneof.fields.len(), 2);
        assert!(oneof
            .fields
            .iter()
            .all(|field| field.label == FieldLabel::Singular));
    }

    #[test]
    fn oneof_rejects_labels() {
        let (ast, errors) = parse_source(
            "syntax = \"proto3\"; message M { oneof payload { repeated string text = 1; } }",
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0].kind(),
            SyntaxErrorKind::UnexpectedFieldLabel("repeated".to_string())
        );
        // The field itself is still kept, as singular.
        let oneof = &ast.messages[0].oneofs[0];
        assert_eq!(oneof.fields[0].label, FieldLabel::Singular);
    }

    #[test]
    fn service_with_rpcs() {
        let ast = parse_ok(
            "syntax = \"proto3\";\nservice Search {\n  rpc Ping(google.protobuf.Empty) returns (google.protobuf.Empty);\n  rpc Watch(stream Req) returns (stream Resp) { option deadline = 1.5; }\n}\n",
        );
        let service = &ast.services[0];
        assert_eq!(service.name, "Search");
        let ping = &service.rpcs[0];
        assert_eq!(ping.input_type, "google.protobuf.Empty");
        assert_eq!(ping.output_type, "google.protobuf.Empty");
        assert!(!ping.client_streaming && !ping.server_streaming);
        let watch = &service.rpcs[1];
        assert!(watch.client_streaming && watch.server_streaming);
        assert_eq!(watch.options.len(), 1);
    }

    #[test]
    fn extend_google_protobuf() {
        let ast = parse_ok(
            "syntax = \"proto3\";\nextend google.protobuf.FieldOptions { optional string tag = 50000; }\n",
        );
        let extend = &ast.extends[0];
        assert_eq!(extend.extendee, "google.protobuf.FieldOptions");
        assert_eq!(extend.fields.len(), 1);
        assert_eq!(extend.fields[0].label, FieldLabel::Optional);
    }

    #[test]
    fn extend_outside_google_protobuf_is_flagged() {
        let (ast, errors) =
            parse_source("syntax = \"proto3\"; extend my.Options { optional bool x = 1; }");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0].kind(),
            SyntaxErrorKind::InvalidExtendTarget("my.Options".to_string())
        );
        // Body is still parsed for recovery.
        assert_eq!(ast.extends[0].fields.len(), 1);
    }

    #[test]
    fn extend_field_without_label_is_flagged() {
        let (ast, errors) = parse_source(
            "syntax = \"proto3\"; extend google.protobuf.MessageOptions { bool flag = 50001; }",
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            *errors[0].kind(),
            SyntaxErrorKind::MissingFieldLabel("flag".to_string())
        );
        assert_eq!(ast.extends[0].fields[0].label, FieldLabel::Optional);
    }

    #[test]
    fn recovery_continues_after_bad_field() {
        let (ast, errors) = parse_source(
            "syntax = \"proto3\";\nmessage M {\n  int32 = 1;\n  string ok = 2;\n}\nmessage N { bool b = 1; }\n",
        );
        assert!(!errors.is_empty());
        let m = &ast.messages[0];
        assert_eq!(m.fields.len(), 1);
        assert_eq!(m.fields[0].name, "ok");
        assert_eq!(ast.messages[1].name, "N");
    }

    #[test]
    fn recovery_at_top_level() {
        let (ast, errors) = parse_source("syntax = \"proto3\"; } message M { int32 a = 1; }");
        assert!(!errors.is_empty());
        assert_eq!(ast.messages.len(), 1);
        assert_eq!(ast.messages[0].fields[0].name, "a");
    }

    #[test]
    fn error_positions_point_at_the_offending_token() {
        let (_, errors) = parse_source("syntax = \"proto3\";\nmessage M {\n  int32 a 1;\n}\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].position(), Position::new(3, 11));
    }

    #[test]
    fn stray_semicolons_are_tolerated() {
        let ast = parse_ok("syntax = \"proto3\";;\nmessage M {;\n  int32 a = 1;;\n};\n");
        assert_eq!(ast.messages[0].fields.len(), 1);
    }

    #[test]
    fn enum_values_with_negative_numbers() {
        let ast = parse_ok(
            "syntax = \"proto3\"; enum E { E_UNSPECIFIED = 0; E_NEGATIVE = -1; E_HEX = 0x10; }",
        );
        let numbers: Vec<_> = ast.enums[0].values.iter().map(|value| value.number).collect();
        assert_eq!(numbers, vec![0, -1, 16]);
    }

    #[test]
    fn unexpected_eof_inside_message() {
        let (ast, errors) = parse_source("syntax = \"proto3\"; message M { int32 a = 1;");
        assert_eq!(ast.messages[0].fields.len(), 1);
        assert!(errors
            .iter()
            .any(|error| matches!(error.kind(), SyntaxErrorKind::UnexpectedEof { .. })));
    }

    #[test]
    fn comments_do_not_disturb_parsing() {
        let ast = parse_ok(
            "// header\nsyntax = \"proto3\";\n/* package comment */\npackage a;\nmessage M {\n  // field comment\n  int32 a = 1; // trailing\n}\n",
        );
        assert_eq!(ast.package.as_deref(), Some("a"));
        assert_eq!(ast.messages[0].fields.len(), 1);
    }

    #[test]
    fn field_numbers_saturate_instead_of_wrapping() {
        let ast = parse_ok("syntax = \"proto3\"; message M { int32 a = 99999999999; }");
        assert_eq!(ast.messages[0].fields[0].number, i32::MAX);
    }
}
