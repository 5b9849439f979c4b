use std::sync::Arc;

use super::{AssociativeOperator, CalculateError, check_type};
use crate::condition::{Condition, always_true};
use crate::context::DiversionContext;
use crate::value::{Evaluation, FlagType, Value};

/// A conditional adjustment to a flag value.
///
/// When the condition holds, the children are folded into this modifier's own
/// value first and the result is then folded into the accumulator with the
/// operator. When it does not hold the accumulator keeps its value, but still
/// picks up the condition's cache level: the absence of an effect is only as
/// stable as the condition that caused it.
#[derive(Clone, Debug)]
pub struct Modifier {
    value: Value,
    operator: AssociativeOperator,
    condition: Arc<dyn Condition>,
    children: Vec<Modifier>,
}

impl Modifier {
    pub fn new(
        value: Value,
        operator: AssociativeOperator,
        condition: Arc<dyn Condition>,
        children: Vec<Modifier>,
    ) -> Result<Self, CalculateError> {
        let flag_type = value.flag_type();
        if !operator.accepts(flag_type) {
            return Err(CalculateError::OperatorMismatch {
                operator,
                flag_type,
            });
        }
        for child in &children {
            check_type(flag_type, child.flag_type())?;
        }
        Ok(Modifier {
            value,
            operator,
            condition,
            children,
        })
    }

    /// A modifier that always applies and has no children.
    pub fn unconditional(value: Value, operator: AssociativeOperator) -> Result<Self, CalculateError> {
        Modifier::new(value, operator, always_true(), Vec::new())
    }

    pub fn flag_type(&self) -> FlagType {
        self.value.flag_type()
    }

    pub fn apply(&self, acc: &mut Evaluation, ctx: &dyn DiversionContext) {
        if !self.condition.evaluate(ctx) {
            acc.merge_level(self.condition.cache_level());
            return;
        }

        let mut local = Evaluation::new(self.value.clone(), self.condition.cache_level());
        for child in &self.children {
            child.apply(&mut local, ctx);
        }
        acc.value = self.operator.apply(&acc.value, &local.value);
        acc.merge_level(local.cache_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::CacheLevel;
    use crate::context::StaticContext;
    use crate::testutils::TestCondition;

    fn op(name: &str, flag_type: FlagType) -> AssociativeOperator {
        AssociativeOperator::resolve(name, flag_type).unwrap()
    }

    #[test]
    fn test_unconditional() {
        let add = Modifier::unconditional(Value::Int(10), op("add", FlagType::Int)).unwrap();
        let mut acc = Evaluation::new(Value::Int(7), CacheLevel::Request);
        add.apply(&mut acc, &StaticContext::new());
        assert_eq!(acc, Evaluation::new(Value::Int(17), CacheLevel::Request));
    }

    #[test]
    fn test_nested() {
        let string = |s: &str| Value::String(s.to_string());
        let modifier = Modifier::new(
            string("fizz"),
            op("add", FlagType::String),
            always_true(),
            vec![
                Modifier::unconditional(string("bu"), op("override", FlagType::String)).unwrap(),
                Modifier::unconditional(string("zz"), op("add", FlagType::String)).unwrap(),
            ],
        )
        .unwrap();

        let mut acc = Evaluation::new(string("fizz"), CacheLevel::None);
        modifier.apply(&mut acc, &StaticContext::new());
        assert_eq!(acc, Evaluation::new(string("fizzbuzz"), CacheLevel::None));
    }

    #[test]
    fn test_false_condition_only_merges_level() {
        let condition = Arc::new(TestCondition::new(false, CacheLevel::Request));
        let child_condition = Arc::new(TestCondition::new(true, CacheLevel::None));
        let child = Modifier::new(
            Value::Int(1),
            op("add", FlagType::Int),
            child_condition.clone(),
            vec![],
        )
        .unwrap();
        let modifier =
            Modifier::new(Value::Int(5), op("add", FlagType::Int), condition.clone(), vec![child])
                .unwrap();

        let mut acc = Evaluation::new(Value::Int(7), CacheLevel::Reload);
        modifier.apply(&mut acc, &StaticContext::new());
        assert_eq!(acc, Evaluation::new(Value::Int(7), CacheLevel::Request));
        assert_eq!(child_condition.evaluations(), 0);

        condition.set(true);
        modifier.apply(&mut acc, &StaticContext::new());
        assert_eq!(acc, Evaluation::new(Value::Int(13), CacheLevel::None));
    }

    #[test]
    fn test_type_checks() {
        assert_eq!(
            Modifier::unconditional(Value::String("x".into()), op("add", FlagType::Int)).unwrap_err(),
            CalculateError::OperatorMismatch {
                operator: AssociativeOperator::Add(FlagType::Int),
                flag_type: FlagType::String,
            }
        );

        let child = Modifier::unconditional(Value::Bool(true), AssociativeOperator::Override).unwrap();
        assert_eq!(
            Modifier::new(
                Value::Int(1),
                AssociativeOperator::Override,
                always_true(),
                vec![child]
            )
            .unwrap_err(),
            CalculateError::TypeMismatch {
                expected: FlagType::Int,
                actual: FlagType::Bool,
            }
        );
    }
}
