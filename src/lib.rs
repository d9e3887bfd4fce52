pub mod ast;
pub mod eval;
pub mod lex;
pub mod parse;
pub mod system;

use miette::Diagnostic;

pub use ast::Expression;
pub use eval::{Environment, Interpreter, RuntimeError, Value};
pub use lex::{LexError, Lexer, Token, TokenKind, tokenize};
pub use parse::{ParseError, Parser};
pub use system::{HostError, HostFunction, HostObject, List, Record, ValueType};

#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),
}

pub fn parse(source: &str) -> Result<Expression, Error> {
    Parser::new(source)?.parse()
}

/// Eager `&&`/`||`; use [`Interpreter::short_circuit`] for the lazy form.
pub fn evaluate(
    expression: &Expression,
    environment: &mut Environment,
) -> Result<Value, RuntimeError> {
    Interpreter::new(environment).evaluate(expression)
}

pub fn run(source: &str, environment: &mut Environment) -> Result<Value, Error> {
    let expression = parse(source)?;
    Ok(evaluate(&expression, environment)?)
}
