//! Typed flag values.

use std::fmt;
use std::str::FromStr;

use crate::condition::CacheLevel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlagType {
    Bool,
    Int,
    Float,
    String,
}

impl FlagType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FlagType::Bool => "bool",
            FlagType::Int => "int",
            FlagType::Float => "float",
            FlagType::String => "string",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(FlagType::Bool),
            "int" | "long" | "integer" => Ok(FlagType::Int),
            "float" | "double" => Ok(FlagType::Float),
            "string" => Ok(FlagType::String),
            _ => Err(ValueError::UnknownType(s.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("unknown flag type: {0}")]
    UnknownType(String),

    #[error("cannot parse {raw:?} as {flag_type}")]
    Unparseable { flag_type: FlagType, raw: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Parses the textual form used in configuration documents.
    pub fn parse(flag_type: FlagType, raw: &str) -> Result<Value, ValueError> {
        let unparseable = || ValueError::Unparseable {
            flag_type,
            raw: raw.to_string(),
        };
        let trimmed = raw.trim();
        match flag_type {
            FlagType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(unparseable()),
            },
            FlagType::Int => trimmed.parse().map(Value::Int).map_err(|_| unparseable()),
            FlagType::Float => trimmed.parse().map(Value::Float).map_err(|_| unparseable()),
            FlagType::String => Ok(Value::String(raw.to_string())),
        }
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            Value::Bool(_) => FlagType::Bool,
            Value::Int(_) => FlagType::Int,
            Value::Float(_) => FlagType::Float,
            Value::String(_) => FlagType::String,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// A computed value together with how long it may be reused.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub cache_level: CacheLevel,
}

impl Evaluation {
    pub fn new(value: Value, cache_level: CacheLevel) -> Self {
        Evaluation { value, cache_level }
    }

    pub(crate) fn merge_level(&mut self, level: CacheLevel) {
        self.cache_level = self.cache_level.merge(level);
    }
}
