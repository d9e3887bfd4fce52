use std::{cmp::Ordering, collections::HashMap, fmt::Display, rc::Rc};

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use crate::{
    ast::{
        AssignmentOperator, BinaryOperator, DeclarationKind, Expression, LiteralKind,
        UnaryOperator,
    },
    system::{HostError, HostFunction, HostObject, List, builtins},
};

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Str(String),
    Object(Rc<dyn HostObject>),
}

impl Value {
    pub fn object(object: impl HostObject + 'static) -> Self {
        Value::Object(Rc::new(object))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::object(List::new(items.into_iter().collect()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }
}

/// Integers compare equal to decimals of exactly the same value; objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other).unwrap_or(false)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Decimal(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Object(object) => write!(f, "<{}>", object.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("undefined variable `{name}`")]
    #[diagnostic(
        code(eval::unknown_variable),
        help("bind `{name}` in the environment or declare it with `let`")
    )]
    UnknownVariable { name: String },

    #[error("undefined function `{name}`")]
    #[diagnostic(code(eval::unknown_function))]
    UnknownFunction { name: String },

    #[error("variable `{name}` is used before it is assigned")]
    #[diagnostic(code(eval::uninitialized))]
    Uninitialized { name: String },

    #[error("cannot assign twice to constant `{name}`")]
    #[diagnostic(code(eval::constant_reassignment))]
    ConstantReassignment { name: String },

    #[error("declaration of `{name}` has no initializer")]
    #[diagnostic(code(eval::missing_initializer), help("write `let {name} = <value>`"))]
    MissingInitializer { name: String },

    #[error("invalid {kind:?} literal `{text}`")]
    #[diagnostic(code(eval::invalid_literal))]
    InvalidLiteral { text: String, kind: LiteralKind },

    #[error("cannot apply `{operator}` to {left} and {right}")]
    #[diagnostic(code(eval::invalid_operands))]
    InvalidOperands {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply `{operator}` to {operand}")]
    #[diagnostic(code(eval::invalid_operand))]
    InvalidOperand {
        operator: &'static str,
        operand: &'static str,
    },

    #[error("{context} must be a bool, got {found}")]
    #[diagnostic(code(eval::not_a_boolean))]
    NotABoolean {
        context: &'static str,
        found: &'static str,
    },

    #[error("Division by zero")]
    #[diagnostic(code(eval::division_by_zero))]
    DivisionByZero,

    #[error("integer overflow in `{operator}`")]
    #[diagnostic(code(eval::overflow))]
    Overflow { operator: &'static str },

    #[error("{found} has no members")]
    #[diagnostic(code(eval::not_an_object))]
    NotAnObject { found: &'static str },

    #[error("{found} cannot be indexed")]
    #[diagnostic(code(eval::not_indexable))]
    NotIndexable { found: &'static str },

    #[error("member must be a property or a method call, got {found}")]
    #[diagnostic(code(eval::invalid_member))]
    InvalidMember { found: &'static str },

    #[error("{target} is not assignable")]
    #[diagnostic(code(eval::not_assignable))]
    NotAssignable { target: &'static str },

    #[error("call to `{name}` failed")]
    #[diagnostic(code(eval::call_failed))]
    Call {
        name: String,
        #[source]
        source: HostError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Clone)]
struct Binding {
    value: Option<Value>,
    kind: DeclarationKind,
}

/// Global scope plus any nested scopes pushed by the host, innermost last.
#[derive(Debug, Default)]
struct Stack {
    global: HashMap<String, Binding>,
    scopes: Vec<HashMap<String, Binding>>,
}

impl Stack {
    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn iter(&self) -> impl Iterator<Item = &HashMap<String, Binding>> {
        self.scopes.iter().rev().chain(std::iter::once(&self.global))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut HashMap<String, Binding>> {
        self.scopes
            .iter_mut()
            .rev()
            .chain(std::iter::once(&mut self.global))
    }

    fn current_mut(&mut self) -> &mut HashMap<String, Binding> {
        match self.scopes.last_mut() {
            Some(scope) => scope,
            None => &mut self.global,
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.iter().find_map(|frame| frame.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.iter_mut().find_map(|frame| frame.get_mut(name))
    }
}

/// Named values and host functions an expression is evaluated against.
#[derive(Debug, Default)]
pub struct Environment {
    stack: Stack,
    functions: HashMap<String, HostFunction>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.define(name, value);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, function: HostFunction) -> Self {
        self.define_function(name, function);
        self
    }

    pub fn with_builtins(mut self) -> Self {
        for (name, function) in builtins() {
            self.define_function(name, function);
        }
        self
    }

    /// Binds a mutable value in the innermost scope, replacing any binding of that name there.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.declare(name, DeclarationKind::Let, Some(value.into()));
    }

    pub fn define_function(&mut self, name: impl Into<String>, function: HostFunction) {
        self.functions.insert(name.into(), function);
    }

    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: DeclarationKind,
        value: Option<Value>,
    ) {
        let name = name.into();
        debug!(%name, ?kind, "declare");
        self.stack.current_mut().insert(name, Binding { value, kind });
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.stack.lookup(name)?.value.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn push_scope(&mut self) {
        self.stack.push();
    }

    /// The global scope is never popped.
    pub fn pop_scope(&mut self) {
        self.stack.pop();
    }

    pub fn lookup(&self, name: &str) -> Result<&Value, RuntimeError> {
        match self.stack.lookup(name) {
            Some(Binding {
                value: Some(value), ..
            }) => Ok(value),
            Some(_) => Err(RuntimeError::Uninitialized {
                name: name.to_string(),
            }),
            None => Err(RuntimeError::UnknownVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Overwrites the innermost binding of `name`, or binds it in the innermost
    /// scope if it is unbound. Initialized constants reject the write.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        match self.stack.lookup_mut(name) {
            Some(Binding {
                kind: DeclarationKind::Const,
                value: Some(_),
            }) => Err(RuntimeError::ConstantReassignment {
                name: name.to_string(),
            }),
            Some(binding) => {
                binding.value = Some(value);
                Ok(())
            }
            None => {
                self.define(name, value);
                Ok(())
            }
        }
    }
}

/// A resolved assignment target. Member targets and indexes are evaluated
/// once, when the place is resolved.
enum Place {
    Variable(String),
    Declaration(String, DeclarationKind),
    Property(Rc<dyn HostObject>, String),
    Index(Rc<dyn HostObject>, Value),
}

pub struct Interpreter<'env> {
    environment: &'env mut Environment,
    short_circuit: bool,
}

impl<'env> Interpreter<'env> {
    pub fn new(environment: &'env mut Environment) -> Self {
        Self {
            environment,
            short_circuit: false,
        }
    }

    /// By default `&&` and `||` evaluate both operands.
    pub fn short_circuit(mut self, enabled: bool) -> Self {
        self.short_circuit = enabled;
        self
    }

    pub fn evaluate(&mut self, expression: &Expression) -> Result<Value, RuntimeError> {
        match expression {
            Expression::Constant { value, kind } => constant(value, *kind),
            Expression::Variable { name } => self.environment.lookup(name).cloned(),
            Expression::VariableDeclaration { name, .. } => Err(RuntimeError::MissingInitializer {
                name: name.clone(),
            }),
            Expression::Group { expression } => self.evaluate(expression),
            Expression::Unary { operand, operator } => self.eval_unary(*operator, operand),
            Expression::Binary {
                left,
                operator,
                right,
            } => self.eval_binary(*operator, left, right),
            Expression::Ternary {
                condition,
                if_true,
                if_false,
            } => match self.evaluate(condition)? {
                Value::Bool(true) => self.evaluate(if_true),
                Value::Bool(false) => self.evaluate(if_false),
                other => Err(RuntimeError::NotABoolean {
                    context: "ternary condition",
                    found: other.type_name(),
                }),
            },
            Expression::Assignment {
                left,
                operator,
                right,
            } => self.eval_assignment(left, *operator, right),
            Expression::FunctionCall { name, arguments } => self.call(name, arguments),
            Expression::MemberAccess { target, member } => {
                let object = self.member_target(target)?;
                match member.as_ref() {
                    Expression::Variable { name } => Ok(object.get_property(name)?),
                    Expression::FunctionCall { name, arguments } => {
                        let arguments = self.arguments(arguments)?;
                        debug!(%name, target = object.type_name(), "invoking method");
                        Ok(object.invoke_method(name, &arguments)?)
                    }
                    other => Err(RuntimeError::InvalidMember {
                        found: other.kind_name(),
                    }),
                }
            }
            Expression::ArrayAccess { target, index } => {
                let object = self.index_target(target)?;
                let index = self.evaluate(index)?;
                Ok(object.get_index(&index)?)
            }
        }
    }

    fn arguments(&mut self, arguments: &[Expression]) -> Result<Vec<Value>, RuntimeError> {
        arguments
            .iter()
            .map(|argument| self.evaluate(argument))
            .collect()
    }

    fn call(&mut self, name: &str, arguments: &[Expression]) -> Result<Value, RuntimeError> {
        let arguments = self.arguments(arguments)?;
        let Some(function) = self.environment.function(name) else {
            return Err(RuntimeError::UnknownFunction {
                name: name.to_string(),
            });
        };

        debug!(%name, arguments = arguments.len(), "calling host function");
        function
            .invoke(arguments)
            .map_err(|source| RuntimeError::Call {
                name: name.to_string(),
                source,
            })
    }

    fn member_target(&mut self, target: &Expression) -> Result<Rc<dyn HostObject>, RuntimeError> {
        match self.evaluate(target)? {
            Value::Object(object) => Ok(object),
            other => Err(RuntimeError::NotAnObject {
                found: other.type_name(),
            }),
        }
    }

    fn index_target(&mut self, target: &Expression) -> Result<Rc<dyn HostObject>, RuntimeError> {
        match self.evaluate(target)? {
            Value::Object(object) => Ok(object),
            other => Err(RuntimeError::NotIndexable {
                found: other.type_name(),
            }),
        }
    }

    fn place(&mut self, expression: &Expression) -> Result<Place, RuntimeError> {
        match expression {
            Expression::Variable { name } => Ok(Place::Variable(name.clone())),
            Expression::VariableDeclaration { name, kind } => {
                Ok(Place::Declaration(name.clone(), *kind))
            }
            Expression::MemberAccess { target, member } => match member.as_ref() {
                Expression::Variable { name } => {
                    let object = self.member_target(target)?;
                    Ok(Place::Property(object, name.clone()))
                }
                other => Err(RuntimeError::NotAssignable {
                    target: other.kind_name(),
                }),
            },
            Expression::ArrayAccess { target, index } => {
                let object = self.index_target(target)?;
                let index = self.evaluate(index)?;
                Ok(Place::Index(object, index))
            }
            other => Err(RuntimeError::NotAssignable {
                target: other.kind_name(),
            }),
        }
    }

    fn read(&self, place: &Place) -> Result<Value, RuntimeError> {
        match place {
            Place::Variable(name) => self.environment.lookup(name).cloned(),
            Place::Declaration(name, _) => Err(RuntimeError::Uninitialized { name: name.clone() }),
            Place::Property(object, name) => Ok(object.get_property(name)?),
            Place::Index(object, index) => Ok(object.get_index(index)?),
        }
    }

    fn write(&mut self, place: Place, value: Value) -> Result<(), RuntimeError> {
        match place {
            Place::Variable(name) => self.environment.assign(&name, value),
            Place::Declaration(name, kind) => {
                self.environment.declare(name, kind, Some(value));
                Ok(())
            }
            Place::Property(object, name) => Ok(object.set_property(&name, value)?),
            Place::Index(object, index) => Ok(object.set_index(&index, value)?),
        }
    }

    /// The place is resolved before the right side runs; a compound operator
    /// reads the place's current value only after the right side is done.
    fn eval_assignment(
        &mut self,
        left: &Expression,
        operator: AssignmentOperator,
        right: &Expression,
    ) -> Result<Value, RuntimeError> {
        let place = self.place(left)?;
        let value = self.evaluate(right)?;

        let value = match operator.binary() {
            None => value,
            Some(binary_operator) => {
                let current = self.read(&place)?;
                binary(binary_operator, current, value)?
            }
        };

        self.write(place, value.clone())?;
        Ok(value)
    }

    fn eval_unary(
        &mut self,
        operator: UnaryOperator,
        operand: &Expression,
    ) -> Result<Value, RuntimeError> {
        let invalid = |value: &Value| RuntimeError::InvalidOperand {
            operator: operator.symbol(),
            operand: value.type_name(),
        };

        if operator.is_mutation() {
            let place = self.place(operand)?;
            let old = self.read(&place)?;
            let step = match operator {
                UnaryOperator::PrefixIncrement | UnaryOperator::PostfixIncrement => 1,
                _ => -1,
            };
            let new = match old {
                Value::Int(n) => n
                    .checked_add(step)
                    .map(Value::Int)
                    .ok_or(RuntimeError::Overflow {
                        operator: operator.symbol(),
                    })?,
                Value::Decimal(n) => Value::Decimal(n + step as f64),
                ref other => return Err(invalid(other)),
            };

            self.write(place, new.clone())?;
            return Ok(match operator {
                UnaryOperator::PostfixIncrement | UnaryOperator::PostfixDecrement => old,
                _ => new,
            });
        }

        let value = self.evaluate(operand)?;
        match (operator, value) {
            (UnaryOperator::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOperator::Negate, Value::Int(n)) => {
                n.checked_neg()
                    .map(Value::Int)
                    .ok_or(RuntimeError::Overflow {
                        operator: operator.symbol(),
                    })
            }
            (UnaryOperator::Negate, Value::Decimal(n)) => Ok(Value::Decimal(-n)),
            (UnaryOperator::Plus, value @ (Value::Int(_) | Value::Decimal(_))) => Ok(value),
            (_, value) => Err(invalid(&value)),
        }
    }

    fn eval_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<Value, RuntimeError> {
        let left = self.evaluate(left)?;

        if self.short_circuit {
            match (operator, &left) {
                (BinaryOperator::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                (BinaryOperator::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                _ => {}
            }
        }

        let right = self.evaluate(right)?;
        binary(operator, left, right)
    }
}

fn constant(text: &str, kind: LiteralKind) -> Result<Value, RuntimeError> {
    let invalid = || RuntimeError::InvalidLiteral {
        text: text.to_string(),
        kind,
    };
    match kind {
        LiteralKind::Int => text.parse().map(Value::Int).map_err(|_| invalid()),
        LiteralKind::Decimal => text.parse().map(Value::Decimal).map_err(|_| invalid()),
        LiteralKind::String => Ok(Value::Str(text.to_string())),
        LiteralKind::Bool => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

enum Numbers {
    Int(i64, i64),
    Decimal(f64, f64),
}

/// Pairs two numeric operands, promoting to decimal if either side is one.
fn numbers(left: &Value, right: &Value) -> Option<Numbers> {
    Some(match (left, right) {
        (Value::Int(a), Value::Int(b)) => Numbers::Int(*a, *b),
        (Value::Int(a), Value::Decimal(b)) => Numbers::Decimal(*a as f64, *b),
        (Value::Decimal(a), Value::Int(b)) => Numbers::Decimal(*a, *b as f64),
        (Value::Decimal(a), Value::Decimal(b)) => Numbers::Decimal(*a, *b),
        _ => return None,
    })
}

/// Orders an integer against a decimal without rounding the integer to `f64`.
fn compare_int_decimal(int: i64, decimal: f64) -> Option<Ordering> {
    // 2^63, the first decimal above every i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if decimal.is_nan() {
        return None;
    }
    if decimal >= LIMIT {
        return Some(Ordering::Less);
    }
    if decimal < -LIMIT {
        return Some(Ordering::Greater);
    }

    let whole = decimal.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(decimal - whole)),
        ordering => Some(ordering),
    }
}

/// `None` when either side is not a number; `Some(None)` when they are unordered (NaN).
fn compare_numbers(left: &Value, right: &Value) -> Option<Option<Ordering>> {
    Some(match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Decimal(b)) => compare_int_decimal(*a, *b),
        (Value::Decimal(a), Value::Int(b)) => compare_int_decimal(*b, *a).map(Ordering::reverse),
        (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
        _ => return None,
    })
}

fn equals(left: &Value, right: &Value) -> Option<bool> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Str(a), Value::Str(b)) => Some(a == b),
        (Value::Object(a), Value::Object(b)) => Some(Rc::ptr_eq(a, b)),
        _ => compare_numbers(left, right).map(|ordering| ordering == Some(Ordering::Equal)),
    }
}

fn compare(operator: BinaryOperator, left: &Value, right: &Value) -> Option<bool> {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => compare_numbers(left, right)?,
    };
    // NaN is unordered: every comparison with it is false
    Some(ordering.is_some_and(|ordering| match operator {
        BinaryOperator::GreaterThan => ordering.is_gt(),
        BinaryOperator::LessThan => ordering.is_lt(),
        BinaryOperator::GreaterThanOrEqual => ordering.is_ge(),
        _ => ordering.is_le(),
    }))
}

/// `+ - * / %` only.
fn arithmetic(operator: BinaryOperator, numbers: Numbers) -> Result<Value, RuntimeError> {
    match numbers {
        Numbers::Int(a, b) => {
            let result = match operator {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Subtract => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                _ if b == 0 => return Err(RuntimeError::DivisionByZero),
                BinaryOperator::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or(RuntimeError::Overflow {
                operator: operator.symbol(),
            })
        }
        Numbers::Decimal(a, b) => Ok(Value::Decimal(match operator {
            BinaryOperator::Add => a + b,
            BinaryOperator::Subtract => a - b,
            BinaryOperator::Multiply => a * b,
            _ if b == 0.0 => return Err(RuntimeError::DivisionByZero),
            BinaryOperator::Divide => a / b,
            _ => a % b,
        })),
    }
}

/// Applies a binary operator to two already evaluated operands.
pub fn binary(operator: BinaryOperator, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let (lhs, rhs) = (left.type_name(), right.type_name());
    let invalid = || RuntimeError::InvalidOperands {
        operator: operator.symbol(),
        left: lhs,
        right: rhs,
    };

    match operator {
        BinaryOperator::And | BinaryOperator::Or => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(match operator {
                BinaryOperator::And => a && b,
                _ => a || b,
            })),
            _ => Err(invalid()),
        },
        BinaryOperator::Equal => equals(&left, &right).map(Value::Bool).ok_or_else(invalid),
        BinaryOperator::NotEqual => equals(&left, &right)
            .map(|equal| Value::Bool(!equal))
            .ok_or_else(invalid),
        BinaryOperator::GreaterThan
        | BinaryOperator::LessThan
        | BinaryOperator::GreaterThanOrEqual
        | BinaryOperator::LessThanOrEqual => compare(operator, &left, &right)
            .map(Value::Bool)
            .ok_or_else(invalid),
        BinaryOperator::Exponent => match numbers(&left, &right).ok_or_else(invalid)? {
            Numbers::Int(a, b) => Ok(Value::Decimal((a as f64).powf(b as f64))),
            Numbers::Decimal(a, b) => Ok(Value::Decimal(a.powf(b))),
        },
        BinaryOperator::Add
        | BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => {
            arithmetic(operator, numbers(&left, &right).ok_or_else(invalid)?)
        }
    }
}
