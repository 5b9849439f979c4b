use super::{CalculateError, Modifier, check_type};
use crate::condition::CacheLevel;
use crate::context::DiversionContext;
use crate::value::{Evaluation, FlagType, Value};

/// A base value and the modifiers folded into it, in order.
#[derive(Clone, Debug)]
pub struct FlagValueCalculator {
    base: Value,
    modifiers: Vec<Modifier>,
}

impl FlagValueCalculator {
    pub fn new(base: Value, modifiers: Vec<Modifier>) -> Result<Self, CalculateError> {
        let flag_type = base.flag_type();
        for modifier in &modifiers {
            check_type(flag_type, modifier.flag_type())?;
        }
        Ok(FlagValueCalculator { base, modifiers })
    }

    pub fn constant(base: Value) -> Self {
        FlagValueCalculator {
            base,
            modifiers: Vec::new(),
        }
    }

    pub fn base_value(&self) -> &Value {
        &self.base
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn flag_type(&self) -> FlagType {
        self.base.flag_type()
    }

    pub fn evaluate(&self, ctx: &dyn DiversionContext) -> Evaluation {
        let mut acc = Evaluation::new(self.base.clone(), CacheLevel::Reload);
        for modifier in &self.modifiers {
            modifier.apply(&mut acc, ctx);
        }
        acc
    }

    pub(crate) fn with_modifiers(&self, modifiers: Vec<Modifier>) -> Self {
        FlagValueCalculator {
            base: self.base.clone(),
            modifiers,
        }
    }
}
