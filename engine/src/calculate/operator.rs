use std::fmt;

use super::CalculateError;
use crate::value::{FlagType, Value};

/// A binary combinator that folds a modifier's value into an accumulated one.
///
/// Resolved by name and value type; the type is fixed at resolution so that
/// applying never has to deal with mismatched operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociativeOperator {
    /// Replaces the accumulated value. Defined for every type.
    Override,
    /// Boolean or, numeric sum, string concatenation.
    Add(FlagType),
    /// Boolean and, numeric product.
    Multiply(FlagType),
}

impl AssociativeOperator {
    pub fn resolve(name: &str, flag_type: FlagType) -> Result<Self, CalculateError> {
        match (name.to_ascii_lowercase().as_str(), flag_type) {
            ("override", _) => Ok(AssociativeOperator::Override),
            ("add", t) => Ok(AssociativeOperator::Add(t)),
            ("multiply", FlagType::Bool | FlagType::Int | FlagType::Float) => {
                Ok(AssociativeOperator::Multiply(flag_type))
            }
            _ => Err(CalculateError::UnknownOperator {
                name: name.to_string(),
                flag_type,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssociativeOperator::Override => "override",
            AssociativeOperator::Add(_) => "add",
            AssociativeOperator::Multiply(_) => "multiply",
        }
    }

    pub fn is_commutative(&self) -> bool {
        !matches!(self, AssociativeOperator::Override)
    }

    /// Whether values of `flag_type` can be folded with this operator.
    pub fn accepts(&self, flag_type: FlagType) -> bool {
        match self {
            AssociativeOperator::Override => true,
            AssociativeOperator::Add(t) | AssociativeOperator::Multiply(t) => *t == flag_type,
        }
    }

    pub fn apply(&self, current: &Value, next: &Value) -> Value {
        use AssociativeOperator::*;
        match (self, current, next) {
            (Override, _, _) => next.clone(),
            (Add(_), Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
            (Add(_), Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Add(_), Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            (Add(_), Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            (Multiply(_), Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
            (Multiply(_), Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
            (Multiply(_), Value::Float(a), Value::Float(b)) => Value::Float(a * b),
            // Operand types are checked when modifiers and calculators are built.
            _ => next.clone(),
        }
    }
}

impl fmt::Display for AssociativeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
