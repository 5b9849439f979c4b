use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::calculate::FlagValueCalculator;
use crate::context::DiversionContext;
use crate::value::Evaluation;

/// Calculators keyed by flag name.
pub type Overrides = HashMap<String, Arc<FlagValueCalculator>>;

/// A chain of calculator maps. Lookups walk from the newest layer of
/// overrides down to the base definitions.
#[derive(Debug, Default)]
pub struct FlagSettings {
    entries: Overrides,
    parent: Option<Arc<FlagSettings>>,
}

impl FlagSettings {
    pub fn new(entries: Overrides) -> Self {
        FlagSettings {
            entries,
            parent: None,
        }
    }

    pub fn calculator(&self, name: &str) -> Option<&Arc<FlagValueCalculator>> {
        let mut current = Some(self);
        while let Some(settings) = current {
            if let Some(calculator) = settings.entries.get(name) {
                return Some(calculator);
            }
            current = settings.parent.as_deref();
        }
        None
    }

    pub fn evaluate(&self, name: &str, ctx: &dyn DiversionContext) -> Option<Evaluation> {
        self.calculator(name).map(|calculator| calculator.evaluate(ctx))
    }

    /// Layers `overrides` on top of these settings. Returns the same chain when
    /// there is nothing to add.
    pub fn with_overrides(self: &Arc<Self>, overrides: Overrides) -> Arc<Self> {
        if overrides.is_empty() {
            return self.clone();
        }
        Arc::new(FlagSettings {
            entries: overrides,
            parent: Some(self.clone()),
        })
    }

    /// Every flag name reachable through the chain.
    pub fn flag_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut current = Some(self);
        while let Some(settings) = current {
            names.extend(settings.entries.keys().cloned());
            current = settings.parent.as_deref();
        }
        names
    }
}
