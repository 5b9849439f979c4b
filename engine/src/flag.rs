//! Flag declaration.
//!
//! Flags are declared by the code that reads them, once per process, through a
//! shared [`FlagRegistry`]. The registry is later consulted by the builder to
//! make sure deployed definitions agree with the declared types.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::{FlagType, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FlagError {
    #[error("flag {name} is declared as {declared}, cannot redeclare it as {requested}")]
    IncompatibleType {
        name: String,
        declared: FlagType,
        requested: FlagType,
    },

    #[error("flag {name} is declared with default {declared}, cannot redeclare it with {requested}")]
    ConflictingDefault {
        name: String,
        declared: Value,
        requested: Value,
    },
}

/// Rust types that can back a flag.
pub trait FlagKind: Clone + Send + Sync + 'static {
    const FLAG_TYPE: FlagType;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FlagKind for bool {
    const FLAG_TYPE: FlagType = FlagType::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FlagKind for i64 {
    const FLAG_TYPE: FlagType = FlagType::Int;

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FlagKind for f64 {
    const FLAG_TYPE: FlagType = FlagType::Float;

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl FlagKind for String {
    const FLAG_TYPE: FlagType = FlagType::String;

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// A typed handle to a declared flag.
#[derive(Clone, Debug)]
pub struct Flag<T> {
    name: Arc<str>,
    default: T,
}

impl<T: FlagKind> Flag<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub fn flag_type(&self) -> FlagType {
        T::FLAG_TYPE
    }
}

#[derive(Default)]
pub struct FlagRegistry {
    flags: RwLock<IndexMap<String, Value>>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a flag, or returns the existing handle when the exact same
    /// declaration was made before.
    pub fn declare<T: FlagKind>(&self, name: &str, default: T) -> Result<Flag<T>, FlagError> {
        let value = default.clone().into_value();
        let mut flags = self.flags.write();
        if let Some(declared) = flags.get(name) {
            if declared.flag_type() != T::FLAG_TYPE {
                return Err(FlagError::IncompatibleType {
                    name: name.to_string(),
                    declared: declared.flag_type(),
                    requested: T::FLAG_TYPE,
                });
            }
            if *declared != value {
                return Err(FlagError::ConflictingDefault {
                    name: name.to_string(),
                    declared: declared.clone(),
                    requested: value,
                });
            }
        } else {
            flags.insert(name.to_string(), value);
        }

        Ok(Flag {
            name: Arc::from(name),
            default,
        })
    }

    pub fn flag_type(&self, name: &str) -> Option<FlagType> {
        self.flags.read().get(name).map(Value::flag_type)
    }

    pub fn default_value(&self, name: &str) -> Option<Value> {
        self.flags.read().get(name).cloned()
    }

    /// Declared flags in declaration order.
    pub fn declared(&self) -> Vec<(String, FlagType)> {
        self.flags
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.flag_type()))
            .collect()
    }
}
