use std::collections::HashSet;

use super::{CacheLevel, Condition, ConditionError};
use crate::context::DiversionContext;

/// True when a request attribute equals one of the configured arguments.
///
/// `PropertyCondition::new("country", CacheLevel::Request)` initialized with
/// `["us", "ca"]` matches requests whose `country` attribute is `us` or `ca`.
#[derive(Debug, Clone)]
pub struct PropertyCondition {
    attribute: String,
    values: HashSet<String>,
    cache_level: CacheLevel,
}

impl PropertyCondition {
    pub fn new(attribute: impl Into<String>, cache_level: CacheLevel) -> Self {
        PropertyCondition {
            attribute: attribute.into(),
            values: HashSet::new(),
            cache_level,
        }
    }
}

impl Condition for PropertyCondition {
    fn initialize(&mut self, args: &[String]) -> Result<(), ConditionError> {
        if args.is_empty() {
            return Err(ConditionError::Arity {
                min: 1,
                max: usize::MAX,
                actual: 0,
            });
        }
        self.values = args.iter().cloned().collect();
        Ok(())
    }

    fn evaluate(&self, ctx: &dyn DiversionContext) -> bool {
        ctx.attribute(&self.attribute)
            .is_some_and(|value| self.values.contains(value))
    }

    fn cache_level(&self) -> CacheLevel {
        self.cache_level
    }
}

/// Accepts every request but insists on an argument count.
///
/// Used by offline tooling that has to validate configurations without access
/// to the real condition implementations.
#[derive(Debug, Clone, Copy)]
pub struct ArityCondition {
    min_args: usize,
    max_args: usize,
}

impl ArityCondition {
    pub fn new(min_args: usize, max_args: usize) -> Self {
        ArityCondition { min_args, max_args }
    }
}

impl Condition for ArityCondition {
    fn initialize(&mut self, args: &[String]) -> Result<(), ConditionError> {
        if args.len() < self.min_args || args.len() > self.max_args {
            return Err(ConditionError::Arity {
                min: self.min_args,
                max: self.max_args,
                actual: args.len(),
            });
        }
        Ok(())
    }

    fn evaluate(&self, _ctx: &dyn DiversionContext) -> bool {
        true
    }

    fn cache_level(&self) -> CacheLevel {
        CacheLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;

    #[test]
    fn test_property_condition() {
        let mut condition = PropertyCondition::new("country", CacheLevel::Request);
        condition
            .initialize(&["us".to_string(), "ca".to_string()])
            .unwrap();

        assert!(condition.evaluate(&StaticContext::new().with_attribute("country", "ca")));
        assert!(!condition.evaluate(&StaticContext::new().with_attribute("country", "de")));
        assert!(!condition.evaluate(&StaticContext::new()));
        assert_eq!(condition.cache_level(), CacheLevel::Request);
    }

    #[test]
    fn test_property_condition_requires_values() {
        let mut condition = PropertyCondition::new("country", CacheLevel::Request);
        assert!(matches!(
            condition.initialize(&[]),
            Err(ConditionError::Arity { actual: 0, .. })
        ));
    }

    #[test]
    fn test_arity_condition() {
        let mut condition = ArityCondition::new(1, 2);
        assert!(condition.initialize(&["a".to_string()]).is_ok());
        assert!(condition
            .initialize(&["a".to_string(), "b".to_string()])
            .is_ok());
        assert_eq!(
            condition.initialize(&[]),
            Err(ConditionError::Arity {
                min: 1,
                max: 2,
                actual: 0
            })
        );
        assert!(condition
            .initialize(&["a".into(), "b".into(), "c".into()])
            .is_err());

        assert!(condition.evaluate(&StaticContext::new()));
        assert_eq!(condition.cache_level(), CacheLevel::None);
    }
}
