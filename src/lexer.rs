//! Tokenization of `.proto` source text.
//!
//! The lexer performs a single forward scan with one-character lookahead and
//! no backtracking, producing a [`Token`] stream that ends in
//! [`TokenKind::Eof`]. Whitespace, newlines, and comments are emitted as
//! tokens classified *ignorable*: the parser skips them, but they stay in
//! the stream so callers can attach leading or trailing comments to
//! declarations.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{LexError, LexErrorKind};

/// A 1-based source position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// The line, starting at 1.
    pub line: u32,
    /// The column, starting at 1. Tabs advance the column by one.
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Position {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The reserved words of the proto3 grammar.
///
/// Scalar type names (`int32`, `string`, …) are deliberately absent: they
/// are ordinary identifiers that the parser interprets contextually, which
/// is what lets `string string = 1;` parse the way the reference compiler
/// accepts it. `true` and `false` are reserved but always surface as
/// [`TokenKind::BoolLiteral`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Syntax,
    Package,
    Import,
    Option,
    Message,
    Enum,
    Service,
    Rpc,
    Returns,
    Stream,
    Oneof,
    Map,
    Reserved,
    Repeated,
    Optional,
    Extend,
    Public,
    Weak,
    To,
}

impl Keyword {
    /// The keyword as written in source.
    pub fn name(self) -> &'static str {
        match self {
            Keyword::Syntax => "syntax",
            Keyword::Package => "package",
            Keyword::Import => "import",
            Keyword::Option => "option",
            Keyword::Message => "message",
            Keyword::Enum => "enum",
            Keyword::Service => "service",
            Keyword::Rpc => "rpc",
            Keyword::Returns => "returns",
            Keyword::Stream => "stream",
            Keyword::Oneof => "oneof",
            Keyword::Map => "map",
            Keyword::Reserved => "reserved",
            Keyword::Repeated => "repeated",
            Keyword::Optional => "optional",
            Keyword::Extend => "extend",
            Keyword::Public => "public",
            Keyword::Weak => "weak",
            Keyword::To => "to",
        }
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, Keyword>> = Lazy::new(|| {
    [
        Keyword::Syntax,
        Keyword::Package,
        Keyword::Import,
        Keyword::Option,
        Keyword::Message,
        Keyword::Enum,
        Keyword::Service,
        Keyword::Rpc,
        Keyword::Returns,
        Keyword::Stream,
        Keyword::Oneof,
        Keyword::Map,
        Keyword::Reserved,
        Keyword::Repeated,
        Keyword::Optional,
        Keyword::Extend,
        Keyword::Public,
        Keyword::Weak,
        Keyword::To,
    ]
    .into_iter()
    .map(|keyword| (keyword.name(), keyword))
    .collect()
});

/// The comment flavor of a [`TokenKind::Comment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    /// `// …` to end of line.
    Line,
    /// `/* … */`, non-nesting.
    Block,
}

/// A lexical token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Keyword(Keyword),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    /// A string literal with its escapes already decoded.
    StringLiteral(String),
    BoolLiteral(bool),
    /// One of `{ } ( ) [ ] < > , ; = . :`.
    Symbol(char),
    Comment(CommentKind, String),
    Whitespace,
    Newline,
    Eof,
}

impl TokenKind {
    /// Whether the parser's lookahead helpers skip this token.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            TokenKind::Comment(..) | TokenKind::Whitespace | TokenKind::Newline
        )
    }

    /// A short rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier `{name}`"),
            TokenKind::Keyword(keyword) => format!("`{}`", keyword.name()),
            TokenKind::IntegerLiteral(value) => format!("integer `{value}`"),
            TokenKind::FloatLiteral(value) => format!("float `{value}`"),
            TokenKind::StringLiteral(value) => format!("string {value:?}"),
            TokenKind::BoolLiteral(value) => format!("`{value}`"),
            TokenKind::Symbol(symbol) => format!("`{symbol}`"),
            TokenKind::Comment(..) => "comment".to_string(),
            TokenKind::Whitespace => "whitespace".to_string(),
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    fn new(kind: TokenKind, position: Position) -> Token {
        Token { kind, position }
    }
}

// `-` and `+` appear only as unary signs on numeric values; the parser
// applies them, the lexer never folds them into literals.
const SYMBOLS: &[char] = &[
    '{', '}', '(', ')', '[', ']', '<', '>', ',', ';', '=', '.', ':', '-', '+',
];

/// Tokenizes `source`, returning the full token stream ending in `Eof`.
///
/// A lexical error is fatal to the file: no token stream is produced and the
/// caller must not attempt to parse.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    offset: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.offset).copied()
    }

    fn peek_at(&self, lookahead: usize) -> Option<char> {
        self.chars.get(self.offset + lookahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += 1;
        self.column += 1;
        Some(c)
    }

    /// Consumes a line break, treating `\r\n` as a single newline.
    fn advance_newline(&mut self) {
        if self.peek() == Some('\r') && self.peek_at(1) == Some('\n') {
            self.offset += 1;
        }
        self.offset += 1;
        self.line += 1;
        self.column = 1;
    }

    fn error(&self, kind: LexErrorKind, position: Position) -> LexError {
        LexError::new(kind, position)
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let position = self.position();
            let kind = match c {
                ' ' | '\t' => {
                    while matches!(self.peek(), Some(' ') | Some('\t')) {
                        self.advance();
                    }
                    TokenKind::Whitespace
                }
                '\n' | '\r' => {
                    self.advance_newline();
                    TokenKind::Newline
                }
                '/' => self.scan_comment(position)?,
                '"' | '\'' => self.scan_string(position)?,
                '0'..='9' => self.scan_number(position)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.scan_word(),
                c if SYMBOLS.contains(&c) => {
                    self.advance();
                    TokenKind::Symbol(c)
                }
                c => return Err(self.error(LexErrorKind::UnexpectedCharacter(c), position)),
            };
            tokens.push(Token::new(kind, position));
        }
        tokens.push(Token::new(TokenKind::Eof, self.position()));
        Ok(tokens)
    }

    fn scan_word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match word.as_str() {
            "true" => TokenKind::BoolLiteral(true),
            "false" => TokenKind::BoolLiteral(false),
            _ => match KEYWORDS.get(word.as_str()) {
                Some(&keyword) => TokenKind::Keyword(keyword),
                None => TokenKind::Identifier(word),
            },
        }
    }

    fn scan_comment(&mut self, position: Position) -> Result<TokenKind, LexError> {
        // The cursor is on the first `/`.
        match self.peek_at(1) {
            Some('/') => {
                self.advance();
                self.advance();
                let mut text = String::new();
                while let Some(c) = self.peek() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                    text.push(c);
                    self.advance();
                }
                Ok(TokenKind::Comment(CommentKind::Line, text))
            }
            Some('*') => {
                self.advance();
                self.advance();
                let mut text = String::new();
                loop {
                    match self.peek() {
                        None => {
                            return Err(
                                self.error(LexErrorKind::UnterminatedComment, position)
                            );
                        }
                        Some('*') if self.peek_at(1) == Some('/') => {
                            self.advance();
                            self.advance();
                            return Ok(TokenKind::Comment(CommentKind::Block, text));
                        }
                        Some('\n') | Some('\r') => {
                            self.advance_newline();
                            text.push('\n');
                        }
                        Some(c) => {
                            text.push(c);
                            self.advance();
                        }
                    }
                }
            }
            _ => Err(self.error(LexErrorKind::UnexpectedCharacter('/'), position)),
        }
    }

    fn scan_string(&mut self, position: Position) -> Result<TokenKind, LexError> {
        let quote = self.advance().unwrap_or('"');
        let mut decoded = String::new();
        loop {
            match self.peek() {
                None | Some('\n') | Some('\r') => {
                    return Err(self.error(LexErrorKind::UnterminatedString, position));
                }
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(TokenKind::StringLiteral(decoded));
                }
                Some('\\') => {
                    let escape_position = self.position();
                    self.advance();
                    decoded.push(self.scan_escape(escape_position)?);
                }
                Some(c) => {
                    decoded.push(c);
                    self.advance();
                }
            }
        }
    }

    fn scan_escape(&mut self, position: Position) -> Result<char, LexError> {
        let designator = match self.peek() {
            Some(c) => c,
            None => return Err(self.error(LexErrorKind::UnterminatedString, position)),
        };
        self.advance();
        match designator {
            'n' => Ok('\n'),
            't' => Ok('\t'),
            'r' => Ok('\r'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            '\'' => Ok('\''),
            '0' => Ok('\0'),
            'x' | 'X' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 2 {
                    match self.peek().and_then(|c| c.to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            digits += 1;
                            self.advance();
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return Err(self.error(LexErrorKind::InvalidEscape(designator), position));
                }
                Ok(value as u8 as char)
            }
            c => Err(self.error(LexErrorKind::InvalidEscape(c), position)),
        }
    }

    fn scan_number(&mut self, position: Position) -> Result<TokenKind, LexError> {
        let mut text = String::new();

        // 0x / 0X hexadecimal.
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            text.push(self.advance().unwrap_or('0'));
            text.push(self.advance().unwrap_or('x'));
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position));
            }
            text.push_str(&digits);
            return match i64::from_str_radix(&digits, 16) {
                Ok(value) => Ok(TokenKind::IntegerLiteral(value)),
                Err(_) => Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position)),
            };
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push(self.advance().unwrap_or('e'));
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.advance().unwrap_or('+'));
            }
            let mut exponent_digits = 0;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                    exponent_digits += 1;
                } else {
                    break;
                }
            }
            if exponent_digits == 0 {
                return Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position));
            }
        }

        if is_float {
            return match text.parse::<f64>() {
                Ok(value) => Ok(TokenKind::FloatLiteral(value)),
                Err(_) => Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position)),
            };
        }

        // A leading zero with more digits is an octal literal.
        let parsed = if text.len() > 1 && text.starts_with('0') {
            if text.bytes().any(|b| b == b'8' || b == b'9') {
                return Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position));
            }
            i64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<i64>()
        };
        match parsed {
            Ok(value) => Ok(TokenKind::IntegerLiteral(value)),
            Err(_) => Err(self.error(LexErrorKind::InvalidNumericLiteral(text), position)),
        }
    }
}
