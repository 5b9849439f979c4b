use super::{CalculateError, FlagValueCalculator, Modifier, check_type};
use crate::value::FlagType;

/// How an experiment changes the calculator of a flag.
#[derive(Clone, Debug)]
pub enum FlagValueOverride {
    /// Discards the prior base value and modifiers.
    Replace(FlagValueCalculator),
    /// Keeps the base value and runs these modifiers after the existing ones.
    Append(Vec<Modifier>),
    /// Keeps the base value and runs these modifiers before the existing ones.
    Prepend(Vec<Modifier>),
}

impl FlagValueOverride {
    pub fn apply(&self, calculator: &FlagValueCalculator) -> FlagValueCalculator {
        match self {
            FlagValueOverride::Replace(replacement) => replacement.clone(),
            FlagValueOverride::Append(modifiers) => {
                let mut combined = calculator.modifiers().to_vec();
                combined.extend(modifiers.iter().cloned());
                calculator.with_modifiers(combined)
            }
            FlagValueOverride::Prepend(modifiers) => {
                let mut combined = modifiers.clone();
                combined.extend(calculator.modifiers().iter().cloned());
                calculator.with_modifiers(combined)
            }
        }
    }

    /// Checks that the override produces values of `flag_type`.
    pub fn check_type(&self, flag_type: FlagType) -> Result<(), CalculateError> {
        match self {
            FlagValueOverride::Replace(replacement) => check_type(flag_type, replacement.flag_type()),
            FlagValueOverride::Append(modifiers) | FlagValueOverride::Prepend(modifiers) => modifiers
                .iter()
                .try_for_each(|m| check_type(flag_type, m.flag_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculate::AssociativeOperator;
    use crate::context::StaticContext;
    use crate::value::Value;

    fn add(i: i64) -> Modifier {
        Modifier::unconditional(Value::Int(i), AssociativeOperator::Add(FlagType::Int)).unwrap()
    }

    fn times(i: i64) -> Modifier {
        Modifier::unconditional(Value::Int(i), AssociativeOperator::Multiply(FlagType::Int)).unwrap()
    }

    #[test]
    fn test_replace() {
        let base = FlagValueCalculator::new(Value::Int(17), vec![add(1)]).unwrap();
        let replaced = FlagValueOverride::Replace(FlagValueCalculator::constant(Value::Int(29)))
            .apply(&base);
        assert_eq!(replaced.base_value(), &Value::Int(29));
        assert!(replaced.modifiers().is_empty());
    }

    #[test]
    fn test_append_and_prepend() {
        let ctx = StaticContext::new();
        let base = FlagValueCalculator::new(Value::Int(17), vec![add(1)]).unwrap();

        let appended = FlagValueOverride::Append(vec![times(2)]).apply(&base);
        assert_eq!(appended.base_value(), &Value::Int(17));
        assert_eq!(appended.evaluate(&ctx).value, Value::Int(36));

        let prepended = FlagValueOverride::Prepend(vec![times(2)]).apply(&base);
        assert_eq!(prepended.base_value(), &Value::Int(17));
        assert_eq!(prepended.evaluate(&ctx).value, Value::Int(35));
    }

    #[test]
    fn test_check_type() {
        assert!(FlagValueOverride::Append(vec![add(1)]).check_type(FlagType::Int).is_ok());
        assert!(FlagValueOverride::Prepend(vec![add(1)]).check_type(FlagType::Float).is_err());
        assert_eq!(
            FlagValueOverride::Replace(FlagValueCalculator::constant(Value::Bool(true)))
                .check_type(FlagType::String),
            Err(CalculateError::TypeMismatch {
                expected: FlagType::String,
                actual: FlagType::Bool,
            })
        );
    }
}
