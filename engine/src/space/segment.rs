use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Bucket, CriterionId, DiversionCriterion, DiversionError, Layer, LayerId, SegmentId};
use crate::condition::{Condition, always_true};
use crate::context::DiversionContext;
use crate::settings::Overrides;

/// A half-open `[start, end)` interval in milliseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_msec: i64,
    pub end_msec: i64,
}

impl TimeWindow {
    pub const ALWAYS: TimeWindow = TimeWindow {
        start_msec: i64::MIN,
        end_msec: i64::MAX,
    };

    pub fn new(start_msec: i64, end_msec: i64) -> Self {
        TimeWindow {
            start_msec,
            end_msec,
        }
    }

    pub fn contains(&self, time_msec: i64) -> bool {
        self.start_msec <= time_msec && time_msec < self.end_msec
    }
}

/// What every segment shares, whichever variant it is.
#[derive(Clone, Debug)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub layer_id: LayerId,
    pub diversion_id: CriterionId,
    pub buckets: BTreeSet<Bucket>,
    pub condition: Arc<dyn Condition>,
    /// Requests are only assigned to the segment inside this window.
    pub active: TimeWindow,
    /// Overrides only apply inside this window.
    pub overrides_window: TimeWindow,
}

impl SegmentInfo {
    pub fn new(
        id: SegmentId,
        layer_id: LayerId,
        diversion_id: CriterionId,
        buckets: impl IntoIterator<Item = Bucket>,
    ) -> Self {
        SegmentInfo {
            id,
            layer_id,
            diversion_id,
            buckets: buckets.into_iter().collect(),
            condition: always_true(),
            active: TimeWindow::ALWAYS,
            overrides_window: TimeWindow::ALWAYS,
        }
    }

    pub fn with_condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_active_window(mut self, active: TimeWindow) -> Self {
        self.active = active;
        self
    }

    pub fn with_overrides_window(mut self, overrides_window: TimeWindow) -> Self {
        self.overrides_window = overrides_window;
        self
    }
}

#[derive(Debug, Default)]
pub struct Experiment {
    pub(crate) base_overrides: Overrides,
    /// Replacement calculators keyed by the id of a launch experiment the
    /// request was also diverted into.
    pub(crate) launch_overrides: BTreeMap<SegmentId, Overrides>,
}

impl Experiment {
    pub fn base_overrides(&self) -> &Overrides {
        &self.base_overrides
    }

    pub fn launch_overrides(&self) -> &BTreeMap<SegmentId, Overrides> {
        &self.launch_overrides
    }
}

#[derive(Debug)]
pub enum SegmentKind {
    Experiment(Experiment),
    Domain(Vec<Layer>),
}

/// A bucket-addressed slice of a layer.
#[derive(Debug)]
pub struct Segment {
    info: SegmentInfo,
    kind: SegmentKind,
    // Kill switch. The only state that changes after a snapshot is published.
    disabled: AtomicBool,
}

/// The request-wide inputs threaded through layers and segments.
pub(crate) struct Scope<'a> {
    pub ctx: &'a dyn DiversionContext,
    pub existing_ids: &'a BTreeSet<SegmentId>,
    pub criteria: &'a [DiversionCriterion],
}

impl Segment {
    pub(crate) fn new(info: SegmentInfo, kind: SegmentKind) -> Self {
        Segment {
            info,
            kind,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.info.id
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn is_valid_for(&self, ctx: &dyn DiversionContext) -> bool {
        !self.is_disabled()
            && self.info.active.contains(ctx.request_time_msec())
            && self.info.condition.evaluate(ctx)
    }

    pub(crate) fn handle(
        &self,
        scope: &Scope<'_>,
        overrides: &mut Overrides,
        new_ids: &mut BTreeSet<SegmentId>,
    ) -> Result<(), DiversionError> {
        match &self.kind {
            SegmentKind::Experiment(experiment) => {
                new_ids.insert(self.info.id);
                if !self
                    .info
                    .overrides_window
                    .contains(scope.ctx.request_time_msec())
                {
                    return Ok(());
                }

                overrides.extend(
                    experiment
                        .base_overrides
                        .iter()
                        .map(|(flag, calc)| (flag.clone(), calc.clone())),
                );
                for (launch_id, launch_overrides) in &experiment.launch_overrides {
                    if new_ids.contains(launch_id) || scope.existing_ids.contains(launch_id) {
                        overrides.extend(
                            launch_overrides
                                .iter()
                                .map(|(flag, calc)| (flag.clone(), calc.clone())),
                        );
                    }
                }
                Ok(())
            }
            SegmentKind::Domain(layers) => {
                for layer in layers {
                    layer.assign(scope, overrides, new_ids)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculate::FlagValueCalculator;
    use crate::condition::CacheLevel;
    use crate::context::StaticContext;
    use crate::testutils::TestCondition;
    use crate::value::Value;

    fn calc(i: i64) -> Arc<FlagValueCalculator> {
        Arc::new(FlagValueCalculator::constant(Value::Int(i)))
    }

    fn experiment(info: SegmentInfo) -> Segment {
        let mut experiment = Experiment::default();
        experiment.base_overrides.insert("foo".into(), calc(29));
        experiment.base_overrides.insert("bar".into(), calc(1));
        experiment
            .launch_overrides
            .insert(5, Overrides::from([("foo".to_string(), calc(58))]));
        Segment::new(info, SegmentKind::Experiment(experiment))
    }

    fn handle(segment: &Segment, ctx: &StaticContext) -> (Overrides, BTreeSet<SegmentId>) {
        let existing = BTreeSet::new();
        let scope = Scope {
            ctx,
            existing_ids: &existing,
            criteria: &[],
        };
        let mut overrides = Overrides::new();
        let mut new_ids = BTreeSet::new();
        segment.handle(&scope, &mut overrides, &mut new_ids).unwrap();
        (overrides, new_ids)
    }

    #[test]
    fn test_window() {
        let window = TimeWindow::new(50, 100);
        assert!(!window.contains(49));
        assert!(window.contains(50));
        assert!(window.contains(99));
        assert!(!window.contains(100));
        assert!(TimeWindow::ALWAYS.contains(0));
    }

    #[test]
    fn test_validity() {
        let condition = Arc::new(TestCondition::new(true, CacheLevel::Reload));
        let segment = experiment(
            SegmentInfo::new(10, 1, 0, [1])
                .with_condition(condition.clone())
                .with_active_window(TimeWindow::new(50, 100)),
        );

        assert!(segment.is_valid_for(&StaticContext::new().with_request_time(80)));
        assert!(!segment.is_valid_for(&StaticContext::new().with_request_time(120)));

        condition.set(false);
        assert!(!segment.is_valid_for(&StaticContext::new().with_request_time(80)));

        condition.set(true);
        segment.disable();
        assert!(segment.is_disabled());
        assert!(!segment.is_valid_for(&StaticContext::new().with_request_time(80)));
    }

    #[test]
    fn test_experiment_overrides_window() {
        let segment = experiment(
            SegmentInfo::new(10, 1, 0, [1]).with_overrides_window(TimeWindow::new(20, 60)),
        );

        let (overrides, ids) = handle(&segment, &StaticContext::new().with_request_time(10));
        assert!(overrides.is_empty());
        assert_eq!(ids, BTreeSet::from([10]));

        let (overrides, ids) = handle(&segment, &StaticContext::new().with_request_time(50));
        assert_eq!(overrides.len(), 2);
        assert_eq!(ids, BTreeSet::from([10]));
    }

    #[test]
    fn test_launch_overrides() {
        let segment = experiment(SegmentInfo::new(10, 1, 0, [1]));
        let ctx = StaticContext::new();
        let existing = BTreeSet::new();
        let scope = Scope {
            ctx: &ctx,
            existing_ids: &existing,
            criteria: &[],
        };

        let mut overrides = Overrides::new();
        let mut new_ids = BTreeSet::from([5]);
        segment.handle(&scope, &mut overrides, &mut new_ids).unwrap();

        let foo = overrides["foo"].evaluate(&ctx).value;
        assert_eq!(foo, Value::Int(58));
        assert_eq!(overrides["bar"].evaluate(&ctx).value, Value::Int(1));
        assert_eq!(new_ids, BTreeSet::from([5, 10]));
    }
}
