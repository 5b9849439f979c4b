//! Per-request diversion results and flag reads.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::condition::CacheLevel;
use crate::context::DiversionContext;
use crate::flag::{Flag, FlagKind};
use crate::settings::FlagSettings;
use crate::space::SegmentId;
use crate::value::{Evaluation, Value};

/// Wraps the host's request and carries what diversion decided for it.
///
/// Created fresh for every request. Until the request has been diverted all
/// flag reads return declared defaults.
#[derive(Debug)]
pub struct RequestState<C> {
    context: C,
    experiment_ids: BTreeSet<SegmentId>,
    flag_settings: Option<Arc<FlagSettings>>,
    value_cache: HashMap<String, Value>,
}

impl<C: DiversionContext> RequestState<C> {
    pub fn new(context: C) -> Self {
        RequestState {
            context,
            experiment_ids: BTreeSet::new(),
            flag_settings: None,
            value_cache: HashMap::new(),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    /// Every segment id the request has been diverted into so far.
    pub fn experiment_ids(&self) -> &BTreeSet<SegmentId> {
        &self.experiment_ids
    }

    pub fn flag_settings(&self) -> Option<&Arc<FlagSettings>> {
        self.flag_settings.as_ref()
    }

    pub fn is_diverted(&self) -> bool {
        self.flag_settings.is_some()
    }

    /// Reads a flag, computing and caching it on first access.
    pub fn get<T: FlagKind>(&mut self, flag: &Flag<T>) -> T {
        if let Some(cached) = self.value_cache.get(flag.name()).and_then(T::from_value) {
            return cached;
        }
        let Some(settings) = &self.flag_settings else {
            return flag.default_value().clone();
        };

        let evaluation = settings
            .evaluate(flag.name(), &self.context)
            .unwrap_or_else(|| {
                tracing::warn!(
                    flag = flag.name(),
                    "No calculator defined for flag, using its declared default"
                );
                Evaluation::new(flag.default_value().clone().into_value(), CacheLevel::Reload)
            });
        let Some(value) = T::from_value(&evaluation.value) else {
            tracing::warn!(
                flag = flag.name(),
                expected = %flag.flag_type(),
                actual = %evaluation.value.flag_type(),
                "Flag evaluated to a value of the wrong type, using its declared default"
            );
            return flag.default_value().clone();
        };

        if evaluation.cache_level != CacheLevel::None {
            self.value_cache
                .insert(flag.name().to_string(), evaluation.value);
        }
        value
    }

    /// Reads a flag by name. `None` before diversion or when the name is not
    /// defined by the current settings.
    pub fn value(&mut self, name: &str) -> Option<Value> {
        if let Some(cached) = self.value_cache.get(name) {
            return Some(cached.clone());
        }
        let evaluation = self
            .flag_settings
            .as_ref()?
            .evaluate(name, &self.context)?;
        if evaluation.cache_level != CacheLevel::None {
            self.value_cache
                .insert(name.to_string(), evaluation.value.clone());
        }
        Some(evaluation.value)
    }

    /// Installs new settings and records the ids diverted into. The value
    /// cache only survives when the settings are unchanged.
    pub(crate) fn record_diversion(
        &mut self,
        settings: Arc<FlagSettings>,
        new_ids: BTreeSet<SegmentId>,
    ) {
        let unchanged = self
            .flag_settings
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &settings));
        if !unchanged {
            self.value_cache.clear();
            self.flag_settings = Some(settings);
        }
        self.experiment_ids.extend(new_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculate::{AssociativeOperator, FlagValueCalculator, Modifier};
    use crate::context::StaticContext;
    use crate::flag::FlagRegistry;
    use crate::settings::Overrides;
    use crate::testutils::TestCondition;
    use crate::value::FlagType;

    fn settings(entries: Vec<(&str, FlagValueCalculator)>) -> Arc<FlagSettings> {
        let overrides: Overrides = entries
            .into_iter()
            .map(|(name, calc)| (name.to_string(), Arc::new(calc)))
            .collect();
        Arc::new(FlagSettings::new(overrides))
    }

    #[test]
    fn test_defaults_before_diversion() {
        let flags = FlagRegistry::new();
        let foo = flags.declare("foo", 12_i64).unwrap();
        let mut state = RequestState::new(StaticContext::new());

        assert!(!state.is_diverted());
        assert_eq!(state.get(&foo), 12);
        assert_eq!(state.value("foo"), None);
        assert!(state.value_cache.is_empty());
    }

    #[test]
    fn test_get_after_diversion() {
        let flags = FlagRegistry::new();
        let foo = flags.declare("foo", 12_i64).unwrap();
        let bar = flags.declare("bar", "zzz".to_string()).unwrap();
        let mut state = RequestState::new(StaticContext::new());

        state.record_diversion(
            settings(vec![("foo", FlagValueCalculator::constant(Value::Int(17)))]),
            BTreeSet::from([1]),
        );

        assert!(state.is_diverted());
        assert_eq!(state.get(&foo), 17);
        assert_eq!(state.value("foo"), Some(Value::Int(17)));
        // not defined in the settings: declared default
        assert_eq!(state.get(&bar), "zzz");
        assert_eq!(state.experiment_ids(), &BTreeSet::from([1]));
    }

    #[test]
    fn test_cache_levels() {
        let flags = FlagRegistry::new();
        let stable = flags.declare("stable", 0_i64).unwrap();
        let volatile = flags.declare("volatile", 0_i64).unwrap();
        let stable_condition = Arc::new(TestCondition::new(true, CacheLevel::Request));
        let volatile_condition = Arc::new(TestCondition::new(true, CacheLevel::None));
        let calc = |condition: Arc<TestCondition>| {
            let modifier = Modifier::new(
                Value::Int(1),
                AssociativeOperator::Add(FlagType::Int),
                condition,
                vec![],
            )
            .unwrap();
            FlagValueCalculator::new(Value::Int(0), vec![modifier]).unwrap()
        };

        let mut state = RequestState::new(StaticContext::new());
        state.record_diversion(
            settings(vec![
                ("stable", calc(stable_condition.clone())),
                ("volatile", calc(volatile_condition.clone())),
            ]),
            BTreeSet::new(),
        );

        assert_eq!(state.get(&stable), 1);
        assert_eq!(state.get(&volatile), 1);
        stable_condition.set(false);
        volatile_condition.set(false);
        assert_eq!(state.get(&stable), 1);
        assert_eq!(state.get(&volatile), 0);
        assert_eq!(stable_condition.evaluations(), 1);
        assert_eq!(volatile_condition.evaluations(), 2);
    }

    #[test]
    fn test_new_settings_clear_cache() {
        let flags = FlagRegistry::new();
        let foo = flags.declare("foo", 12_i64).unwrap();
        let first = settings(vec![("foo", FlagValueCalculator::constant(Value::Int(17)))]);
        let mut state = RequestState::new(StaticContext::new());

        state.record_diversion(first.clone(), BTreeSet::from([1]));
        assert_eq!(state.get(&foo), 17);

        state.record_diversion(first, BTreeSet::from([2]));
        assert_eq!(state.value_cache.len(), 1);

        state.record_diversion(
            settings(vec![("foo", FlagValueCalculator::constant(Value::Int(29)))]),
            BTreeSet::new(),
        );
        assert!(state.value_cache.is_empty());
        assert_eq!(state.get(&foo), 29);
        assert_eq!(state.experiment_ids(), &BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_wrong_type_falls_back_to_default() {
        let flags = FlagRegistry::new();
        let foo = flags.declare("foo", 12_i64).unwrap();
        let mut state = RequestState::new(StaticContext::new());
        state.record_diversion(
            settings(vec![("foo", FlagValueCalculator::constant(Value::Bool(true)))]),
            BTreeSet::new(),
        );
        assert_eq!(state.get(&foo), 12);
    }
}
