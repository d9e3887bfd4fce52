use std::{borrow::Cow, fmt::Display};

use miette::{Diagnostic, SourceSpan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Returned by [`CharReader::current`] once the input is exhausted.
pub const EOF_CHAR: char = '\0';

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum LexError {
    #[error("Unexpected character '{token}'")]
    #[diagnostic(
        code(lex::unexpected_character),
        help("remove or correct the character: `{token}`")
    )]
    UnexpectedCharacter {
        token: char,

        #[label("this character")]
        span: SourceSpan,
    },

    #[error("unterminated double quote string")]
    #[diagnostic(
        code(lex::unterminated_string),
        help("add a trailing `\"` to terminate the string literal")
    )]
    UnterminatedString {
        #[label("this string literal is never closed")]
        span: SourceSpan,
    },
}

impl LexError {
    pub fn offset(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { span, .. } | LexError::UnterminatedString { span } => {
                span.offset()
            }
        }
    }
}

/// Cursor over the source text. Reading past the end yields [`EOF_CHAR`].
#[derive(Debug, Clone)]
pub struct CharReader<'de> {
    text: &'de str,
    position: usize,
}

impl<'de> CharReader<'de> {
    pub fn new(text: &'de str) -> Self {
        CharReader { text, position: 0 }
    }

    pub fn current(&self) -> char {
        self.rest().chars().next().unwrap_or(EOF_CHAR)
    }

    pub fn advance(&mut self) {
        if let Some(c) = self.rest().chars().next() {
            self.position += c.len_utf8();
        }
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.text.len()
    }

    /// Byte offset of the current character.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn rest(&self) -> &'de str {
        &self.text[self.position..]
    }

    pub fn slice(&self, start: usize, end: usize) -> &'de str {
        self.text.get(start..end).unwrap_or_default()
    }

    pub fn source(&self) -> &'de str {
        self.text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    /// The slice of source text this token was read from.
    pub lexeme: &'de str,
    /// Identifier name or literal text, with string escapes already applied.
    pub value: Option<Cow<'de, str>>,
    pub span: SourceSpan,
}

impl<'de> Token<'de> {
    fn eof(offset: usize) -> Self {
        Token {
            kind: TokenKind::Eof,
            lexeme: "",
            value: None,
            span: SourceSpan::from(offset..offset),
        }
    }

    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or(self.lexeme)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Eof,
    Identifier,
    Int,
    Decimal,
    String,
    True,
    False,
    Let,
    Const,
    Var,
    If,
    For,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Equal,
    Colon,
    Question,
    Greater,
    Less,
    AndAnd,
    OrOr,
    EqualEqual,
    BangEqual,
    GreaterEqual,
    LessEqual,
    PlusPlus,
    MinusMinus,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    CaretEqual,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Eof => "EOF",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Int => "INT",
            TokenKind::Decimal => "DECIMAL",
            TokenKind::String => "STRING",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
            TokenKind::Let => "LET",
            TokenKind::Const => "CONST",
            TokenKind::Var => "VAR",
            TokenKind::If => "IF",
            TokenKind::For => "FOR",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "STAR",
            TokenKind::Slash => "SLASH",
            TokenKind::Percent => "PERCENT",
            TokenKind::Caret => "CARET",
            TokenKind::Bang => "BANG",
            TokenKind::Dot => "DOT",
            TokenKind::Comma => "COMMA",
            TokenKind::LeftParen => "LEFT_PAREN",
            TokenKind::RightParen => "RIGHT_PAREN",
            TokenKind::LeftBracket => "LEFT_BRACKET",
            TokenKind::RightBracket => "RIGHT_BRACKET",
            TokenKind::Equal => "EQUAL",
            TokenKind::Colon => "COLON",
            TokenKind::Question => "QUESTION",
            TokenKind::Greater => "GREATER",
            TokenKind::Less => "LESS",
            TokenKind::AndAnd => "AND_AND",
            TokenKind::OrOr => "OR_OR",
            TokenKind::EqualEqual => "EQUAL_EQUAL",
            TokenKind::BangEqual => "BANG_EQUAL",
            TokenKind::GreaterEqual => "GREATER_EQUAL",
            TokenKind::LessEqual => "LESS_EQUAL",
            TokenKind::PlusPlus => "PLUS_PLUS",
            TokenKind::MinusMinus => "MINUS_MINUS",
            TokenKind::PlusEqual => "PLUS_EQUAL",
            TokenKind::MinusEqual => "MINUS_EQUAL",
            TokenKind::StarEqual => "STAR_EQUAL",
            TokenKind::SlashEqual => "SLASH_EQUAL",
            TokenKind::PercentEqual => "PERCENT_EQUAL",
            TokenKind::CaretEqual => "CARET_EQUAL",
        }
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind;
        let lit = self.lexeme;
        match &self.value {
            Some(value) => write!(f, "{kind} {lit} {value}"),
            None => write!(f, "{kind} {lit} null"),
        }
    }
}

const SYMBOLS: &[(&str, TokenKind)] = &[
    (">", TokenKind::Greater),
    ("<", TokenKind::Less),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("!", TokenKind::Bang),
    (".", TokenKind::Dot),
    (",", TokenKind::Comma),
    ("(", TokenKind::LeftParen),
    (")", TokenKind::RightParen),
    ("[", TokenKind::LeftBracket),
    ("]", TokenKind::RightBracket),
    ("^", TokenKind::Caret),
    ("=", TokenKind::Equal),
    (":", TokenKind::Colon),
    ("?", TokenKind::Question),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("==", TokenKind::EqualEqual),
    ("!=", TokenKind::BangEqual),
    (">=", TokenKind::GreaterEqual),
    ("<=", TokenKind::LessEqual),
    ("+=", TokenKind::PlusEqual),
    ("-=", TokenKind::MinusEqual),
    ("*=", TokenKind::StarEqual),
    ("/=", TokenKind::SlashEqual),
    ("%=", TokenKind::PercentEqual),
    ("^=", TokenKind::CaretEqual),
];

/// Single-token-lookahead lexer. The token under the cursor is [`Lexer::current`].
pub struct Lexer<'de> {
    reader: CharReader<'de>,
    current: Token<'de>,
}

impl<'de> Lexer<'de> {
    pub fn new(input: &'de str) -> Result<Self, LexError> {
        let mut lexer = Lexer {
            reader: CharReader::new(input),
            current: Token::eof(0),
        };
        lexer.advance()?;
        Ok(lexer)
    }

    pub fn source(&self) -> &'de str {
        self.reader.source()
    }

    pub fn current(&self) -> &Token<'de> {
        &self.current
    }

    /// Reads the next token into `current`. Once the input is exhausted every
    /// call produces `EOF` again.
    pub fn advance(&mut self) -> Result<&Token<'de>, LexError> {
        self.current = self.lex()?;
        trace!(token = %self.current, "lexed");
        Ok(&self.current)
    }

    fn lex(&mut self) -> Result<Token<'de>, LexError> {
        while self.reader.current().is_whitespace() {
            self.reader.advance();
        }

        let start = self.reader.position();
        if self.reader.is_eof() {
            return Ok(Token::eof(start));
        }

        if let Some(kind) = self.lex_symbol() {
            // `.5` is a decimal, not member access
            if kind == TokenKind::Dot && self.reader.current().is_ascii_digit() {
                return Ok(self.lex_decimal(start));
            }
            return Ok(self.token(kind, start, None));
        }

        match self.reader.current() {
            '0'..='9' => Ok(self.lex_number(start)),
            '"' => self.lex_string(start),
            c if c.is_alphabetic() => Ok(self.lex_identifier(start)),
            c => Err(LexError::UnexpectedCharacter {
                token: c,
                span: SourceSpan::from(start..start + c.len_utf8()),
            }),
        }
    }

    fn token(&self, kind: TokenKind, start: usize, value: Option<Cow<'de, str>>) -> Token<'de> {
        let end = self.reader.position();
        Token {
            kind,
            lexeme: self.reader.slice(start, end),
            value,
            span: SourceSpan::from(start..end),
        }
    }

    fn literal(&self, kind: TokenKind, start: usize) -> Token<'de> {
        let text = self.reader.slice(start, self.reader.position());
        self.token(kind, start, Some(Cow::Borrowed(text)))
    }

    /// Longest-prefix match against [`SYMBOLS`]: the candidate keeps growing
    /// while some symbol still starts with it.
    fn lex_symbol(&mut self) -> Option<TokenKind> {
        let rest = self.reader.rest();
        let mut longest: Option<(&str, TokenKind)> = None;
        let mut candidate = 0;

        for c in rest.chars() {
            candidate += c.len_utf8();
            let prefix = &rest[..candidate];

            let mut survivors = SYMBOLS
                .iter()
                .filter(|(symbol, _)| symbol.starts_with(prefix))
                .peekable();
            if survivors.peek().is_none() {
                break;
            }
            if let Some(&exact) = survivors.find(|(symbol, _)| symbol.len() == prefix.len()) {
                longest = Some(exact);
            }
        }

        let (symbol, kind) = longest?;
        for _ in symbol.chars() {
            self.reader.advance();
        }
        Some(kind)
    }

    fn eat_digits(&mut self) {
        while self.reader.current().is_ascii_digit() {
            self.reader.advance();
        }
    }

    fn lex_number(&mut self, start: usize) -> Token<'de> {
        self.eat_digits();
        if self.reader.current() != '.' {
            return self.literal(TokenKind::Int, start);
        }
        self.reader.advance();
        self.lex_decimal(start)
    }

    fn lex_decimal(&mut self, start: usize) -> Token<'de> {
        self.eat_digits();
        self.literal(TokenKind::Decimal, start)
    }

    fn lex_identifier(&mut self, start: usize) -> Token<'de> {
        while matches!(self.reader.current(), c if c.is_alphanumeric() || c == '_') {
            self.reader.advance();
        }

        let literal = self.reader.slice(start, self.reader.position());
        let kind = match literal {
            "if" => TokenKind::If,
            "for" => TokenKind::For,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "var" => TokenKind::Var,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            _ => TokenKind::Identifier,
        };

        self.literal(kind, start)
    }

    /// `\` and `/` both escape the following character, which is taken verbatim.
    fn lex_string(&mut self, start: usize) -> Result<Token<'de>, LexError> {
        let unterminated = |reader: &CharReader<'_>| LexError::UnterminatedString {
            span: SourceSpan::from(start..reader.position()),
        };

        self.reader.advance();
        let body = self.reader.position();
        let mut escaped: Option<String> = None;

        loop {
            if self.reader.is_eof() {
                return Err(unterminated(&self.reader));
            }
            match self.reader.current() {
                '"' => break,
                '\\' | '/' => {
                    let value = escaped.get_or_insert_with(|| {
                        self.reader.slice(body, self.reader.position()).to_string()
                    });
                    self.reader.advance();
                    if self.reader.is_eof() {
                        return Err(unterminated(&self.reader));
                    }
                    value.push(self.reader.current());
                }
                c => {
                    if let Some(value) = escaped.as_mut() {
                        value.push(c);
                    }
                }
            }
            self.reader.advance();
        }

        let value = match escaped {
            Some(value) => Cow::Owned(value),
            None => Cow::Borrowed(self.reader.slice(body, self.reader.position())),
        };
        self.reader.advance();

        Ok(self.token(TokenKind::String, start, Some(value)))
    }
}

/// Lexes the whole input, including the trailing `EOF` token.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lexer = Lexer::new(input)?;
    let mut tokens = Vec::new();
    loop {
        let token = lexer.current().clone();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
        lexer.advance()?;
    }
}
