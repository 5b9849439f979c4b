use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::calculate::{AssociativeOperator, FlagValueCalculator, FlagValueOverride, Modifier};
use crate::condition::{CacheLevel, Condition};
use crate::context::DiversionContext;
use crate::flag::{Flag, FlagRegistry};
use crate::space::{
    Bucket, DiversionCriterion, FlagDefinition, LayerId, LayerInfo, SegmentDefinition, SegmentId,
    SegmentInfo, SpaceDefinition,
};
use crate::value::{FlagType, Value};

/// A condition whose answer can be flipped from the test and which counts how
/// often it was asked.
#[derive(Debug)]
pub struct TestCondition {
    result: AtomicBool,
    cache_level: CacheLevel,
    evaluations: AtomicUsize,
}

impl TestCondition {
    pub fn new(result: bool, cache_level: CacheLevel) -> Self {
        TestCondition {
            result: AtomicBool::new(result),
            cache_level,
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, result: bool) {
        self.result.store(result, Ordering::SeqCst);
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl Condition for TestCondition {
    fn evaluate(&self, _ctx: &dyn DiversionContext) -> bool {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.result.load(Ordering::SeqCst)
    }

    fn cache_level(&self) -> CacheLevel {
        self.cache_level
    }
}

/// The registry used by space fixtures: `foo` (int 12), `bar` (string "zzz")
/// and `baz` (bool false).
pub fn declared_flags() -> (FlagRegistry, Flag<i64>, Flag<String>, Flag<bool>) {
    let registry = FlagRegistry::new();
    let foo = registry.declare("foo", 12i64).unwrap();
    let bar = registry.declare("bar", "zzz".to_string()).unwrap();
    let baz = registry.declare("baz", false).unwrap();
    (registry, foo, bar, baz)
}

pub fn flag(name: &str, value: Value) -> FlagDefinition {
    FlagDefinition::new(name, FlagValueCalculator::constant(value))
}

/// Defines `foo` = 17, `bar` = "aaa" and `baz` = true, plus one hashed
/// criterion with 100 buckets.
pub fn base_definition() -> SpaceDefinition {
    SpaceDefinition {
        flags: vec![
            flag("foo", Value::Int(17)),
            flag("bar", Value::String("aaa".into())),
            flag("baz", Value::Bool(true)),
        ],
        criteria: vec![DiversionCriterion::new(0, 100, false)],
        ..Default::default()
    }
}

/// A layer recording `base`, `base + 1` and `base + 2` as its unbiased, fixed
/// biased and random biased ids.
pub fn layer(id: LayerId, domain_id: SegmentId, launch: bool, base: SegmentId) -> LayerInfo {
    LayerInfo {
        id,
        domain_id,
        launch,
        unbiased_id: base,
        fixed_biased_id: base + 1,
        random_biased_id: base + 2,
    }
}

pub fn experiment(
    id: SegmentId,
    layer_id: LayerId,
    buckets: impl IntoIterator<Item = Bucket>,
    overrides: Vec<(&str, FlagValueOverride)>,
) -> SegmentDefinition {
    SegmentDefinition::Experiment {
        info: SegmentInfo::new(id, layer_id, 0, buckets),
        overrides: overrides
            .into_iter()
            .map(|(name, flag_override)| (name.to_string(), flag_override))
            .collect(),
    }
}

pub fn domain(
    id: SegmentId,
    layer_id: LayerId,
    buckets: impl IntoIterator<Item = Bucket>,
) -> SegmentDefinition {
    SegmentDefinition::Domain(SegmentInfo::new(id, layer_id, 0, buckets))
}

/// Adjusts the info of a segment fixture in place.
pub fn with_info(
    mut segment: SegmentDefinition,
    f: impl FnOnce(SegmentInfo) -> SegmentInfo,
) -> SegmentDefinition {
    match &mut segment {
        SegmentDefinition::Experiment { info, .. } | SegmentDefinition::Domain(info) => {
            *info = f(info.clone());
        }
    }
    segment
}

pub fn replace(value: Value) -> FlagValueOverride {
    FlagValueOverride::Replace(FlagValueCalculator::constant(value))
}

pub fn append(modifiers: Vec<Modifier>) -> FlagValueOverride {
    FlagValueOverride::Append(modifiers)
}

pub fn prepend(modifiers: Vec<Modifier>) -> FlagValueOverride {
    FlagValueOverride::Prepend(modifiers)
}

pub fn times(factor: i64) -> Modifier {
    Modifier::unconditional(Value::Int(factor), AssociativeOperator::Multiply(FlagType::Int)).unwrap()
}
