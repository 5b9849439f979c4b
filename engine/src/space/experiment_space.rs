use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use metrics::SharedString;

use super::segment::Scope;
use super::{DiversionCriterion, DiversionError, Layer, Segment, SegmentId};
use crate::context::DiversionContext;
use crate::settings::{FlagSettings, Overrides};

/// An immutable, validated configuration snapshot.
///
/// Built by [`super::ExperimentSpaceBuilder`]. After publication only the
/// segments' kill switches change.
#[derive(Debug)]
pub struct ExperimentSpace {
    version: String,
    base_settings: Arc<FlagSettings>,
    segments: HashMap<SegmentId, Arc<Segment>>,
    criteria: Vec<DiversionCriterion>,
    launch_layers: Vec<Layer>,
    permanent_layers: Vec<Layer>,
    // Metric label values for every id a diversion can record.
    labels: HashMap<SegmentId, SharedString>,
}

impl ExperimentSpace {
    pub(crate) fn new(
        version: String,
        base_settings: Arc<FlagSettings>,
        segments: HashMap<SegmentId, Arc<Segment>>,
        criteria: Vec<DiversionCriterion>,
        launch_layers: Vec<Layer>,
        permanent_layers: Vec<Layer>,
    ) -> Self {
        let labels = segments
            .keys()
            .chain(
                launch_layers
                    .iter()
                    .chain(&permanent_layers)
                    .flat_map(|layer| layer.owned_ids()),
            )
            .map(|id| (*id, SharedString::from(Arc::<str>::from(id.to_string()))))
            .collect();
        ExperimentSpace {
            version,
            base_settings,
            segments,
            criteria,
            launch_layers,
            permanent_layers,
            labels,
        }
    }

    /// A space with no flags, layers or segments.
    pub fn empty(version: impl Into<String>) -> Self {
        ExperimentSpace::new(
            version.into(),
            Arc::new(FlagSettings::default()),
            HashMap::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    pub fn version_identifier(&self) -> &str {
        &self.version
    }

    pub fn base_settings(&self) -> &Arc<FlagSettings> {
        &self.base_settings
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Arc<Segment>> {
        self.segments.get(&id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn criteria(&self) -> &[DiversionCriterion] {
        &self.criteria
    }

    pub fn launch_layers(&self) -> &[Layer] {
        &self.launch_layers
    }

    pub fn permanent_layers(&self) -> &[Layer] {
        &self.permanent_layers
    }

    /// The metric label for a recorded id, rendered once per snapshot.
    pub fn segment_label(&self, id: SegmentId) -> SharedString {
        match self.labels.get(&id) {
            Some(label) => label.clone(),
            None => SharedString::from(id.to_string()),
        }
    }

    /// Flips the kill switch of a segment. Returns false for unknown ids.
    pub fn disable(&self, id: SegmentId) -> bool {
        match self.segments.get(&id) {
            Some(segment) => {
                segment.disable();
                true
            }
            None => false,
        }
    }

    /// Diverts a request and returns the flag settings it should read from.
    ///
    /// `existing_ids` and `current` describe what earlier diversions already
    /// decided for the request; newly entered segment ids go to `new_ids`.
    pub fn diversion(
        &self,
        ctx: &dyn DiversionContext,
        existing_ids: &BTreeSet<SegmentId>,
        current: Option<&Arc<FlagSettings>>,
        new_ids: &mut BTreeSet<SegmentId>,
    ) -> Result<Arc<FlagSettings>, DiversionError> {
        let scope = Scope {
            ctx,
            existing_ids,
            criteria: &self.criteria,
        };

        let base = current.unwrap_or(&self.base_settings);

        let forced = ctx.forced_experiment_ids();
        if !forced.is_empty() {
            let mut overrides = Overrides::new();
            for id in forced {
                match self.segments.get(id) {
                    // already applied by an earlier diversion
                    Some(_) if existing_ids.contains(id) => {}
                    Some(segment) if !segment.is_disabled() => {
                        segment.handle(&scope, &mut overrides, new_ids)?
                    }
                    Some(_) => tracing::debug!(segment_id = id, "Ignoring disabled forced segment"),
                    None => tracing::debug!(segment_id = id, "Ignoring unknown forced segment"),
                }
            }
            return Ok(base.with_overrides(overrides));
        }

        let launched = base.with_overrides(Self::pass(&self.launch_layers, &scope, new_ids)?);
        Ok(launched.with_overrides(Self::pass(&self.permanent_layers, &scope, new_ids)?))
    }

    fn pass(
        layers: &[Layer],
        scope: &Scope<'_>,
        new_ids: &mut BTreeSet<SegmentId>,
    ) -> Result<Overrides, DiversionError> {
        let mut overrides = Overrides::new();
        for layer in layers {
            layer.assign(scope, &mut overrides, new_ids)?;
        }
        Ok(overrides)
    }
}
