use std::sync::Arc;

use super::{CacheLevel, Condition};
use crate::context::DiversionContext;

fn merged_level(conditions: &[Arc<dyn Condition>]) -> CacheLevel {
    conditions
        .iter()
        .fold(CacheLevel::Reload, |level, c| level.merge(c.cache_level()))
}

/// True when every child is true. Evaluation stops at the first false child.
#[derive(Debug)]
pub struct And {
    conditions: Vec<Arc<dyn Condition>>,
    cache_level: CacheLevel,
}

impl And {
    pub fn new(conditions: Vec<Arc<dyn Condition>>) -> Self {
        let cache_level = merged_level(&conditions);
        And {
            conditions,
            cache_level,
        }
    }
}

impl Condition for And {
    fn evaluate(&self, ctx: &dyn DiversionContext) -> bool {
        self.conditions.iter().all(|c| c.evaluate(ctx))
    }

    fn cache_level(&self) -> CacheLevel {
        self.cache_level
    }
}

/// True when any child is true. Evaluation stops at the first true child.
#[derive(Debug)]
pub struct Or {
    conditions: Vec<Arc<dyn Condition>>,
    cache_level: CacheLevel,
}

impl Or {
    pub fn new(conditions: Vec<Arc<dyn Condition>>) -> Self {
        let cache_level = merged_level(&conditions);
        Or {
            conditions,
            cache_level,
        }
    }
}

impl Condition for Or {
    fn evaluate(&self, ctx: &dyn DiversionContext) -> bool {
        self.conditions.iter().any(|c| c.evaluate(ctx))
    }

    fn cache_level(&self) -> CacheLevel {
        self.cache_level
    }
}

#[derive(Debug)]
pub struct Not(pub Arc<dyn Condition>);

impl Condition for Not {
    fn evaluate(&self, ctx: &dyn DiversionContext) -> bool {
        !self.0.evaluate(ctx)
    }

    fn cache_level(&self) -> CacheLevel {
        self.0.cache_level()
    }
}
