//! Composition of flag values from a base value and conditional modifiers.

mod calculator;
mod modifier;
mod operator;
mod overrides;

pub use calculator::FlagValueCalculator;
pub use modifier::Modifier;
pub use operator::AssociativeOperator;
pub use overrides::FlagValueOverride;

use crate::value::FlagType;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalculateError {
    #[error("no operator {name:?} for {flag_type} values")]
    UnknownOperator { name: String, flag_type: FlagType },

    #[error("operator {operator} cannot combine {flag_type} values")]
    OperatorMismatch {
        operator: AssociativeOperator,
        flag_type: FlagType,
    },

    #[error("expected a {expected} value, found {actual}")]
    TypeMismatch { expected: FlagType, actual: FlagType },
}

fn check_type(expected: FlagType, actual: FlagType) -> Result<(), CalculateError> {
    if expected != actual {
        return Err(CalculateError::TypeMismatch { expected, actual });
    }
    Ok(())
}
