//! Bindings between the interpreter and the host application.
//!
//! Hosts expose objects through [`HostObject`] and functions through
//! [`HostFunction`]. [`List`] and [`Record`] cover the common array and
//! object shapes so simple hosts need no trait impls of their own.

use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use miette::Diagnostic;
use thiserror::Error;

use crate::eval::{Environment, Value};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum HostError {
    #[error("`{type_name}` has no property `{name}`")]
    UnknownProperty { type_name: String, name: String },

    #[error("`{type_name}` has no method `{name}`")]
    UnknownMethod { type_name: String, name: String },

    #[error("`{type_name}` cannot be indexed")]
    NotIndexable { type_name: String },

    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("`{type_name}` cannot be indexed by {found}")]
    InvalidIndex {
        type_name: String,
        found: &'static str,
    },

    #[error("property `{name}` of `{type_name}` is read-only")]
    ReadOnly { type_name: String, name: String },

    #[error("expected {expected} argument(s), got {found}")]
    Arity { expected: usize, found: usize },

    #[error("argument {position} should be {expected}, got {found}")]
    ArgumentType {
        position: usize,
        expected: ValueType,
        found: &'static str,
    },

    #[error("declared to return {expected}, returned {found}")]
    ReturnType {
        expected: ValueType,
        found: &'static str,
    },

    #[error("{0}")]
    Failed(String),
}

/// Parameter and return types a host function declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Decimal,
    Str,
    Object,
    Any,
}

impl ValueType {
    /// Same-kind values pass through; integers widen to decimals.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (ValueType::Any, value) => Some(value),
            (ValueType::Bool, value @ Value::Bool(_)) => Some(value),
            (ValueType::Int, value @ Value::Int(_)) => Some(value),
            (ValueType::Decimal, Value::Int(n)) => Some(Value::Decimal(n as f64)),
            (ValueType::Decimal, value @ Value::Decimal(_)) => Some(value),
            (ValueType::Str, value @ Value::Str(_)) => Some(value),
            (ValueType::Object, value @ Value::Object(_)) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Decimal => "decimal",
            ValueType::Str => "string",
            ValueType::Object => "object",
            ValueType::Any => "any",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub returns: ValueType,
}

type Entry = dyn Fn(&[Value]) -> Result<Value, HostError>;

/// A callable supplied by the host, with the signature the evaluator checks
/// arguments and results against.
#[derive(Clone)]
pub struct HostFunction {
    signature: Signature,
    entry: Rc<Entry>,
}

impl HostFunction {
    pub fn new<F>(params: Vec<ValueType>, returns: ValueType, entry: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + 'static,
    {
        HostFunction {
            signature: Signature {
                params,
                returns,
            },
            entry: Rc::new(entry),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn invoke(&self, arguments: Vec<Value>) -> Result<Value, HostError> {
        let params = &self.signature.params;
        if params.len() != arguments.len() {
            return Err(HostError::Arity {
                expected: params.len(),
                found: arguments.len(),
            });
        }

        let arguments = arguments
            .into_iter()
            .zip(params)
            .enumerate()
            .map(|(i, (value, expected))| {
                let found = value.type_name();
                expected.coerce(value).ok_or(HostError::ArgumentType {
                    position: i + 1,
                    expected: *expected,
                    found,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = (self.entry)(&arguments)?;
        let found = result.type_name();
        self.signature
            .returns
            .coerce(result)
            .ok_or(HostError::ReturnType {
                expected: self.signature.returns,
                found,
            })
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Property, method and index access on a host value. Only `type_name` and
/// `get_property` are required; everything else reports the capability as missing.
pub trait HostObject: fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_property(&self, name: &str) -> Result<Value, HostError>;

    fn set_property(&self, name: &str, _value: Value) -> Result<(), HostError> {
        Err(HostError::ReadOnly {
            type_name: self.type_name().to_string(),
            name: name.to_string(),
        })
    }

    fn invoke_method(&self, name: &str, _arguments: &[Value]) -> Result<Value, HostError> {
        Err(HostError::UnknownMethod {
            type_name: self.type_name().to_string(),
            name: name.to_string(),
        })
    }

    fn get_index(&self, _index: &Value) -> Result<Value, HostError> {
        Err(HostError::NotIndexable {
            type_name: self.type_name().to_string(),
        })
    }

    fn set_index(&self, _index: &Value, _value: Value) -> Result<(), HostError> {
        Err(HostError::NotIndexable {
            type_name: self.type_name().to_string(),
        })
    }
}

/// Growable array. Indexed by integers; exposes `length` and `push(value)`.
///
/// Items are shared handles, so a list may end up holding itself. Such a cycle
/// is never freed.
#[derive(Default)]
pub struct List {
    items: RefCell<Vec<Value>>,
}

// Shallow: items may point back at this list.
impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_struct("List");
        match self.items.try_borrow() {
            Ok(items) => list.field("len", &items.len()).finish(),
            Err(_) => list.finish_non_exhaustive(),
        }
    }
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        List {
            items: RefCell::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    fn slot(&self, index: &Value) -> Result<usize, HostError> {
        let Value::Int(index) = *index else {
            return Err(HostError::InvalidIndex {
                type_name: self.type_name().to_string(),
                found: index.type_name(),
            });
        };
        let len = self.len();
        usize::try_from(index)
            .ok()
            .filter(|slot| *slot < len)
            .ok_or(HostError::IndexOutOfRange { index, len })
    }
}

impl HostObject for List {
    fn type_name(&self) -> &str {
        "List"
    }

    fn get_property(&self, name: &str) -> Result<Value, HostError> {
        match name {
            "length" => Ok(Value::Int(self.len() as i64)),
            _ => Err(HostError::UnknownProperty {
                type_name: self.type_name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn invoke_method(&self, name: &str, arguments: &[Value]) -> Result<Value, HostError> {
        match (name, arguments) {
            ("push", [value]) => {
                let mut items = self.items.borrow_mut();
                items.push(value.clone());
                Ok(Value::Int(items.len() as i64))
            }
            ("push", _) => Err(HostError::Arity {
                expected: 1,
                found: arguments.len(),
            }),
            _ => Err(HostError::UnknownMethod {
                type_name: self.type_name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn get_index(&self, index: &Value) -> Result<Value, HostError> {
        let slot = self.slot(index)?;
        Ok(self.items.borrow()[slot].clone())
    }

    fn set_index(&self, index: &Value, value: Value) -> Result<(), HostError> {
        let slot = self.slot(index)?;
        self.items.borrow_mut()[slot] = value;
        Ok(())
    }
}

/// Named fields, readable as properties (`p.x`) or by string key (`p["x"]`).
pub struct Record {
    type_name: String,
    fields: RefCell<BTreeMap<String, Value>>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut record = f.debug_struct("Record");
        record.field("type_name", &self.type_name);
        match self.fields.try_borrow() {
            Ok(fields) => record
                .field("fields", &fields.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => record.finish_non_exhaustive(),
        }
    }
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: RefCell::default(),
        }
    }

    pub fn with_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.borrow_mut().insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    fn key<'a>(&self, index: &'a Value) -> Result<&'a str, HostError> {
        match index {
            Value::Str(key) => Ok(key.as_str()),
            other => Err(HostError::InvalidIndex {
                type_name: self.type_name.clone(),
                found: other.type_name(),
            }),
        }
    }
}

impl HostObject for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_property(&self, name: &str) -> Result<Value, HostError> {
        self.field(name).ok_or_else(|| HostError::UnknownProperty {
            type_name: self.type_name.clone(),
            name: name.to_string(),
        })
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), HostError> {
        self.fields.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn get_index(&self, index: &Value) -> Result<Value, HostError> {
        self.get_property(self.key(index)?)
    }

    fn set_index(&self, index: &Value, value: Value) -> Result<(), HostError> {
        self.set_property(self.key(index)?, value)
    }
}

/// `parseInt(string) -> int` and `eval(string) -> string`, the latter running its
/// argument in a fresh environment that only has these builtins.
pub fn builtins() -> Vec<(&'static str, HostFunction)> {
    let parse_int = HostFunction::new(vec![ValueType::Str], ValueType::Int, |args| match args {
        [Value::Str(text)] => text
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|e| HostError::Failed(format!("`{text}` is not an integer: {e}"))),
        _ => Err(HostError::Failed("expected a string".to_string())),
    });

    let eval = HostFunction::new(vec![ValueType::Str], ValueType::Str, |args| match args {
        [Value::Str(source)] => {
            let mut environment = Environment::new().with_builtins();
            crate::run(source, &mut environment)
                .map(|value| Value::Str(value.to_string()))
                .map_err(|e| HostError::Failed(e.to_string()))
        }
        _ => Err(HostError::Failed("expected a string".to_string())),
    });

    vec![("parseInt", parse_int), ("eval", eval)]
}
