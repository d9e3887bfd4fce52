use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use tracing::trace;

use crate::{
    Error,
    ast::{
        AssignmentOperator, BinaryOperator, DeclarationKind, Expression, LiteralKind,
        UnaryOperator,
    },
    lex::{Lexer, Token, TokenKind},
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token {found}")]
    #[diagnostic(
        code(parse::unexpected_token),
        help("expected a literal, a variable, a function call or `(`")
    )]
    UnexpectedToken {
        found: TokenKind,

        #[label("here")]
        span: SourceSpan,
    },

    #[error("Expected {expected}, found {found}")]
    #[diagnostic(code(parse::expected_token), help("use `{expected}` here instead"))]
    ExpectedToken {
        expected: TokenKind,
        found: TokenKind,

        #[label("here")]
        span: SourceSpan,
    },

    #[error("left-hand side must be a variable or member")]
    #[diagnostic(
        code(parse::invalid_increment_target),
        help("`{operator}` only applies to variables, members and indexed elements")
    )]
    InvalidIncrementTarget {
        operator: &'static str,

        #[label("this operator")]
        span: SourceSpan,
    },

    #[error("left-hand side of `{operator}` is not assignable")]
    #[diagnostic(
        code(parse::invalid_assignment_target),
        help("only declarations, variables, members and indexed elements can be assigned")
    )]
    InvalidAssignmentTarget {
        operator: &'static str,

        #[label("this assignment")]
        span: SourceSpan,
    },

    #[error("`{operator}` cannot initialize a declaration")]
    #[diagnostic(
        code(parse::compound_declaration),
        help("use `=` to initialize a new variable")
    )]
    CompoundDeclaration {
        operator: &'static str,

        #[label("this operator")]
        span: SourceSpan,
    },

    #[error("expression nests deeper than {limit} levels")]
    #[diagnostic(
        code(parse::too_deep),
        help("split the expression or bind intermediate results to variables")
    )]
    TooDeep {
        limit: usize,

        #[label("nesting limit reached here")]
        span: SourceSpan,
    },

    #[error("Unexpected {found} after the end of the expression")]
    #[diagnostic(code(parse::trailing_input))]
    TrailingInput {
        found: TokenKind,

        #[label("remove this")]
        span: SourceSpan,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Associativity {
    Left,
    Right,
}

fn binary_operator(kind: TokenKind) -> Option<(u8, Associativity, BinaryOperator)> {
    use Associativity::*;
    Some(match kind {
        TokenKind::OrOr => (2, Left, BinaryOperator::Or),
        TokenKind::AndAnd => (3, Left, BinaryOperator::And),
        TokenKind::EqualEqual => (4, Left, BinaryOperator::Equal),
        TokenKind::BangEqual => (4, Left, BinaryOperator::NotEqual),
        TokenKind::Greater => (5, Left, BinaryOperator::GreaterThan),
        TokenKind::Less => (5, Left, BinaryOperator::LessThan),
        TokenKind::GreaterEqual => (5, Left, BinaryOperator::GreaterThanOrEqual),
        TokenKind::LessEqual => (5, Left, BinaryOperator::LessThanOrEqual),
        TokenKind::Plus => (6, Left, BinaryOperator::Add),
        TokenKind::Minus => (6, Left, BinaryOperator::Subtract),
        TokenKind::Star => (7, Left, BinaryOperator::Multiply),
        TokenKind::Slash => (7, Left, BinaryOperator::Divide),
        TokenKind::Percent => (7, Left, BinaryOperator::Modulo),
        TokenKind::Caret => (8, Right, BinaryOperator::Exponent),
        _ => return None,
    })
}

fn assignment_operator(kind: TokenKind) -> Option<AssignmentOperator> {
    Some(match kind {
        TokenKind::Equal => AssignmentOperator::Assign,
        TokenKind::PlusEqual => AssignmentOperator::AddAssign,
        TokenKind::MinusEqual => AssignmentOperator::SubtractAssign,
        TokenKind::StarEqual => AssignmentOperator::MultiplyAssign,
        TokenKind::SlashEqual => AssignmentOperator::DivideAssign,
        TokenKind::PercentEqual => AssignmentOperator::ModuloAssign,
        TokenKind::CaretEqual => AssignmentOperator::ExponentAssign,
        _ => return None,
    })
}

fn prefix_operator(kind: TokenKind) -> Option<UnaryOperator> {
    Some(match kind {
        TokenKind::PlusPlus => UnaryOperator::PrefixIncrement,
        TokenKind::MinusMinus => UnaryOperator::PrefixDecrement,
        TokenKind::Bang => UnaryOperator::Not,
        TokenKind::Plus => UnaryOperator::Plus,
        TokenKind::Minus => UnaryOperator::Negate,
        _ => return None,
    })
}

/// Deepest nesting the parser accepts. Parenthesized groups, ternary branches,
/// assignment chains, operator chains and postfix suffixes all count.
pub const MAX_DEPTH: usize = 128;

pub struct Parser<'de> {
    lexer: Lexer<'de>,
    depth: usize,
}

impl<'de> Parser<'de> {
    pub fn new(whole: &'de str) -> Result<Self, Error> {
        Ok(Parser {
            lexer: Lexer::new(whole)?,
            depth: 0,
        })
    }

    pub fn source(&self) -> &'de str {
        self.lexer.source()
    }

    /// Parses the whole input as a single expression.
    pub fn parse(mut self) -> Result<Expression, Error> {
        let expression = self.parse_assignment()?;

        let token = self.lexer.current();
        if token.kind != TokenKind::Eof {
            return Err(ParseError::TrailingInput {
                found: token.kind,
                span: token.span,
            }
            .into());
        }

        trace!(%expression, "parsed");
        Ok(expression)
    }

    fn kind(&self) -> TokenKind {
        self.lexer.current().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    /// Moves past the current token and hands it back.
    fn advance(&mut self) -> Result<Token<'de>, Error> {
        let token = self.lexer.current().clone();
        self.lexer.advance()?;
        Ok(token)
    }

    fn deepen(&mut self) -> Result<(), Error> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep {
                limit: MAX_DEPTH,
                span: self.lexer.current().span,
            }
            .into());
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `parse` one level deeper, restoring the depth once it returns.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let depth = self.depth;
        self.deepen()?;
        let result = parse(self);
        self.depth = depth;
        result
    }

    fn consume(&mut self, kind: TokenKind) -> Result<bool, Error> {
        if !self.check(kind) {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token<'de>, Error> {
        if self.check(expected) {
            return self.advance();
        }
        let token = self.lexer.current();
        Err(ParseError::ExpectedToken {
            expected,
            found: token.kind,
            span: token.span,
        }
        .into())
    }

    pub fn parse_assignment(&mut self) -> Result<Expression, Error> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expression, Error> {
        let left = self.parse_declaration()?;

        let Some(operator) = assignment_operator(self.kind()) else {
            return Ok(left);
        };
        let token = self.advance()?;

        match &left {
            Expression::VariableDeclaration { .. } if operator != AssignmentOperator::Assign => {
                return Err(ParseError::CompoundDeclaration {
                    operator: operator.symbol(),
                    span: token.span,
                }
                .into());
            }
            Expression::VariableDeclaration { .. } => {}
            left if left.is_lvalue() => {}
            _ => {
                return Err(ParseError::InvalidAssignmentTarget {
                    operator: operator.symbol(),
                    span: token.span,
                }
                .into());
            }
        }

        let right = self.parse_assignment()?;
        Ok(Expression::Assignment {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    fn parse_declaration(&mut self) -> Result<Expression, Error> {
        let kind = match self.kind() {
            TokenKind::Let => DeclarationKind::Let,
            TokenKind::Const => DeclarationKind::Const,
            _ => return self.parse_ternary(),
        };
        self.advance()?;

        let name = self.expect(TokenKind::Identifier)?;
        Ok(Expression::VariableDeclaration {
            name: name.value().to_string(),
            kind,
        })
    }

    /// `cond ? a : b`; each branch is a full ternary so nesting needs no parentheses.
    fn parse_ternary(&mut self) -> Result<Expression, Error> {
        self.nested(Self::ternary)
    }

    fn ternary(&mut self) -> Result<Expression, Error> {
        let mut condition = self.parse_binary(0)?;

        while self.consume(TokenKind::Question)? {
            let if_true = self.parse_ternary()?;
            self.expect(TokenKind::Colon)?;
            let if_false = self.parse_ternary()?;

            condition = Expression::Ternary {
                condition: Box::new(condition),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            };
        }

        Ok(condition)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, Error> {
        self.nested(|parser| parser.binary(min_precedence))
    }

    /// Each fold of a left-associative chain adds a tree level, so it counts
    /// towards the depth limit like a recursive call.
    fn binary(&mut self, min_precedence: u8) -> Result<Expression, Error> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;

        while let Some((precedence, associativity, operator)) = binary_operator(self.kind()) {
            if precedence < min_precedence {
                break;
            }
            self.deepen()?;
            self.advance()?;

            let floor = match associativity {
                Associativity::Left => precedence + 1,
                Associativity::Right => precedence,
            };
            let right = self.parse_binary(floor)?;

            left = Expression::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }

        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, Error> {
        if let Some(operator) = prefix_operator(self.kind()) {
            let token = self.advance()?;
            let operand = self.parse_postfix()?;
            return unary(operator, operand, &token);
        }

        let operand = self.parse_postfix()?;
        let operator = match self.kind() {
            TokenKind::PlusPlus => UnaryOperator::PostfixIncrement,
            TokenKind::MinusMinus => UnaryOperator::PostfixDecrement,
            _ => return Ok(operand),
        };
        let token = self.advance()?;
        unary(operator, operand, &token)
    }

    /// Index and member suffixes, left to right: `a.b[0].c(1)`.
    fn parse_postfix(&mut self) -> Result<Expression, Error> {
        let depth = self.depth;
        let mut expression = self.parse_primary()?;

        loop {
            if self.check(TokenKind::LeftBracket) || self.check(TokenKind::Dot) {
                self.deepen()?;
            }
            if self.consume(TokenKind::LeftBracket)? {
                let index = self.parse_binary(0)?;
                self.expect(TokenKind::RightBracket)?;
                expression = Expression::ArrayAccess {
                    target: Box::new(expression),
                    index: Box::new(index),
                };
            } else if self.consume(TokenKind::Dot)? {
                let name = self.expect(TokenKind::Identifier)?;
                let member = self.parse_call_or_variable(&name)?;
                expression = Expression::MemberAccess {
                    target: Box::new(expression),
                    member: Box::new(member),
                };
            } else {
                self.depth = depth;
                return Ok(expression);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        let kind = match self.kind() {
            TokenKind::Identifier => {
                let name = self.advance()?;
                return self.parse_call_or_variable(&name);
            }
            TokenKind::LeftParen => {
                self.advance()?;
                let expression = self.parse_ternary()?;
                self.expect(TokenKind::RightParen)?;
                return Ok(Expression::Group {
                    expression: Box::new(expression),
                });
            }
            TokenKind::Int => LiteralKind::Int,
            TokenKind::Decimal => LiteralKind::Decimal,
            TokenKind::String => LiteralKind::String,
            TokenKind::True | TokenKind::False => LiteralKind::Bool,
            found => {
                return Err(ParseError::UnexpectedToken {
                    found,
                    span: self.lexer.current().span,
                }
                .into());
            }
        };

        let literal = self.advance()?;
        Ok(Expression::Constant {
            value: literal.value().to_string(),
            kind,
        })
    }

    /// `name` has already been consumed; a directly following `(` makes it a call.
    fn parse_call_or_variable(&mut self, name: &Token<'de>) -> Result<Expression, Error> {
        let name = name.value().to_string();
        if !self.consume(TokenKind::LeftParen)? {
            return Ok(Expression::Variable { name });
        }

        trace!(%name, "parsing call arguments");
        let mut arguments = Vec::new();
        while !self.check(TokenKind::RightParen) {
            if self.check(TokenKind::Eof) {
                break;
            }
            arguments.push(self.parse_assignment()?);
            self.consume(TokenKind::Comma)?;
        }
        self.expect(TokenKind::RightParen)?;

        Ok(Expression::FunctionCall { name, arguments })
    }
}

fn unary(
    operator: UnaryOperator,
    operand: Expression,
    token: &Token<'_>,
) -> Result<Expression, Error> {
    if operator.is_mutation() && !operand.is_lvalue() {
        return Err(ParseError::InvalidIncrementTarget {
            operator: operator.symbol(),
            span: token.span,
        }
        .into());
    }
    Ok(Expression::Unary {
        operand: Box::new(operand),
        operator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Expression, Error> {
        Parser::new(input)?.parse()
    }

    fn tree(input: &str) -> String {
        match parse(input) {
            Ok(expression) => expression.to_string(),
            Err(e) => panic!("`{input}` failed to parse: {e}"),
        }
    }

    fn parse_error(input: &str) -> ParseError {
        match parse(input) {
            Err(Error::Parse(e)) => e,
            other => panic!("`{input}` should be a parse error, got {other:?}"),
        }
    }

    #[test]
    fn precedence() {
        assert_eq!(tree("1+2*3"), "(+ 1 (* 2 3))");
        assert_eq!(tree("(1+2)*3"), "(* (group (+ 1 2)) 3)");
        assert_eq!(tree("1-2-3"), "(- (- 1 2) 3)");
        assert_eq!(tree("8/4%3"), "(% (/ 8 4) 3)");
        assert_eq!(tree("a || b && c == d"), "(|| a (&& b (== c d)))");
        assert_eq!(tree("a + 1 >= b * 2"), "(>= (+ a 1) (* b 2))");
    }

    #[test]
    fn exponent_is_right_associative() {
        assert_eq!(tree("2^3^2"), "(^ 2 (^ 3 2))");
        assert_eq!(tree("2*3^2"), "(* 2 (^ 3 2))");
    }

    #[test]
    fn prefix_binds_tighter_than_exponent() {
        assert_eq!(tree("-2^2"), "(^ (- 2) 2)");
        assert_eq!(tree("!a && b"), "(&& (! a) b)");
    }

    #[test]
    fn nested_ternary() {
        assert_eq!(tree("1>0?2>1?10:20:30"), "(? (> 1 0) (? (> 2 1) 10 20) 30)");
        assert_eq!(tree("a ? b : c ? d : e"), "(? a b (? c d e))");
    }

    #[test]
    fn assignment_is_right_recursive() {
        assert_eq!(tree("i=i+=i+=i"), "(= i (+= i (+= i i)))");
        assert_eq!(tree("let x = 5"), "(= (let x) 5)");
        assert_eq!(tree("const y = x ? 1 : 2"), "(= (const y) (? x 1 2))");
        assert_eq!(tree("point.x -= 1"), "(-= (. point x) 1)");
        assert_eq!(tree("arr[i] ^= 2"), "(^= ([] arr i) 2)");
    }

    #[test]
    fn calls_and_members() {
        assert_eq!(tree("f()"), "(call f)");
        assert_eq!(tree("f(1, a = 2 3,)"), "(call f 1 (= a 2) 3)");
        assert_eq!(tree("point.x"), "(. point x)");
        assert_eq!(tree("arr[0]"), "([] arr 0)");
        assert_eq!(tree("list.push(1)"), "(. list (call push 1))");
        assert_eq!(tree("a.items[1].name"), "(. ([] (. a items) 1) name)");
        assert_eq!(tree("arr[1 + i]"), "([] arr (+ 1 i))");
    }

    #[test]
    fn increments() {
        assert_eq!(tree("a++"), "(post++ a)");
        assert_eq!(tree("--a"), "(-- a)");
        assert_eq!(tree("++a[0]"), "(++ ([] a 0))");
        assert_eq!(tree("p.x--"), "(post-- (. p x))");
        assert_eq!(tree("a+++b"), "(+ (post++ a) b)");
    }

    #[test]
    fn literals() {
        assert_eq!(
            parse("\"hi\"").unwrap(),
            Expression::Constant {
                value: "hi".to_string(),
                kind: LiteralKind::String,
            }
        );
        assert_eq!(
            parse("true").unwrap(),
            Expression::Constant {
                value: "true".to_string(),
                kind: LiteralKind::Bool,
            }
        );
        assert_eq!(tree(".5 + 1.5"), "(+ .5 1.5)");
    }

    #[test]
    fn increment_needs_lvalue() {
        assert!(matches!(
            parse_error("1++"),
            ParseError::InvalidIncrementTarget { operator: "++", .. }
        ));
        assert!(matches!(
            parse_error("--(a)"),
            ParseError::InvalidIncrementTarget { operator: "--", .. }
        ));
        assert!(matches!(
            parse_error("f()++"),
            ParseError::InvalidIncrementTarget { .. }
        ));
    }

    #[test]
    fn declaration_rejects_compound_assignment() {
        assert_eq!(
            parse_error("let x += 1"),
            ParseError::CompoundDeclaration {
                operator: "+=",
                span: SourceSpan::from(6..8),
            }
        );
    }

    #[test]
    fn assignment_needs_lvalue() {
        assert!(matches!(
            parse_error("1 = 2"),
            ParseError::InvalidAssignmentTarget { operator: "=", .. }
        ));
        assert!(matches!(
            parse_error("a + b *= 2"),
            ParseError::InvalidAssignmentTarget { operator: "*=", .. }
        ));
    }

    #[test]
    fn missing_structural_tokens() {
        let expected = |input: &str| match parse_error(input) {
            ParseError::ExpectedToken {
                expected, found, ..
            } => (expected, found),
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(expected("(1+2"), (TokenKind::RightParen, TokenKind::Eof));
        assert_eq!(expected("a[1"), (TokenKind::RightBracket, TokenKind::Eof));
        assert_eq!(expected("a ? 1 2"), (TokenKind::Colon, TokenKind::Int));
        assert_eq!(expected("let 5"), (TokenKind::Identifier, TokenKind::Int));
        assert_eq!(expected("a."), (TokenKind::Identifier, TokenKind::Eof));
        assert_eq!(expected("f(1, 2"), (TokenKind::RightParen, TokenKind::Eof));
    }

    #[test]
    fn unexpected_tokens() {
        assert_eq!(
            parse_error(")"),
            ParseError::UnexpectedToken {
                found: TokenKind::RightParen,
                span: SourceSpan::from(0..1),
            }
        );
        assert!(matches!(
            parse_error(""),
            ParseError::UnexpectedToken {
                found: TokenKind::Eof,
                ..
            }
        ));
        assert!(matches!(
            parse_error("var x"),
            ParseError::UnexpectedToken {
                found: TokenKind::Var,
                ..
            }
        ));
        assert!(matches!(
            parse_error("1 2"),
            ParseError::TrailingInput {
                found: TokenKind::Int,
                ..
            }
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let parens = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        let too_deep = |input: &str| {
            assert!(
                matches!(
                    parse(input),
                    Err(Error::Parse(ParseError::TooDeep {
                        limit: MAX_DEPTH,
                        ..
                    }))
                ),
                "`{}...` should hit the nesting limit",
                &input[..8]
            );
        };

        assert!(parse(&parens(20)).is_ok());
        assert!(parse(&format!("1{}", "+1".repeat(50))).is_ok());
        assert!(parse(&format!("a{}", ".b".repeat(50))).is_ok());

        too_deep(&parens(1000));
        too_deep(&format!("{}2", "2^".repeat(1000)));
        too_deep(&format!("{}1", "a=".repeat(1000)));
        too_deep(&format!("a{}", ".b".repeat(1000)));
        too_deep(&format!("a{}", "[0]".repeat(1000)));
        too_deep(&format!("1{}", "+1".repeat(1000)));
        too_deep(&format!("{}2", "c?1:".repeat(1000)));
        too_deep(&format!("{}{}", "f(".repeat(1000), ")".repeat(1000)));
    }

    #[test]
    fn lexical_errors_surface_unchanged() {
        assert!(matches!(parse("1 + #"), Err(Error::Lex(_))));
        assert!(matches!(parse("\"open"), Err(Error::Lex(_))));
    }
}
