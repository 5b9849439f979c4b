use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::layer_builder::LayerBuilder;
use super::{
    CriterionId, DEFAULT_DOMAIN, DiversionCriterion, Experiment, ExperimentSpace, Layer,
    LayerId, LayerInfo, Segment, SegmentId, SegmentInfo, SegmentKind,
};
use crate::calculate::{FlagValueCalculator, FlagValueOverride};
use crate::error::ValidationError;
use crate::flag::FlagRegistry;
use crate::settings::{FlagSettings, Overrides};
use crate::value::FlagType;

#[derive(Clone, Debug)]
pub struct FlagDefinition {
    pub name: String,
    pub calculator: FlagValueCalculator,
}

impl FlagDefinition {
    pub fn new(name: impl Into<String>, calculator: FlagValueCalculator) -> Self {
        FlagDefinition {
            name: name.into(),
            calculator,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SegmentDefinition {
    Experiment {
        info: SegmentInfo,
        overrides: BTreeMap<String, FlagValueOverride>,
    },
    Domain(SegmentInfo),
}

impl SegmentDefinition {
    pub fn info(&self) -> &SegmentInfo {
        match self {
            SegmentDefinition::Experiment { info, .. } | SegmentDefinition::Domain(info) => info,
        }
    }
}

/// Everything needed to build a space, in no particular order.
#[derive(Clone, Debug, Default)]
pub struct SpaceDefinition {
    pub flags: Vec<FlagDefinition>,
    pub criteria: Vec<DiversionCriterion>,
    pub layers: Vec<LayerInfo>,
    pub segments: Vec<SegmentDefinition>,
}

type LaunchOverrides = HashMap<SegmentId, BTreeMap<SegmentId, Overrides>>;

/// Validates definitions as they are added and assembles an
/// [`ExperimentSpace`] from them.
///
/// Layers must be added after the domain they are nested in, and segments
/// after their layer. [`ExperimentSpaceBuilder::add_definition`] takes care of
/// that ordering for unordered input.
#[derive(Debug, Default)]
pub struct ExperimentSpaceBuilder {
    declared: HashMap<String, FlagType>,
    flags: BTreeMap<String, Arc<FlagValueCalculator>>,
    criteria: BTreeMap<CriterionId, DiversionCriterion>,
    layers: HashMap<LayerId, LayerBuilder>,
    // Registration order; every layer comes after the layer owning its domain.
    layer_order: Vec<LayerId>,
    segment_layers: HashMap<SegmentId, LayerId>,
    domains: HashSet<SegmentId>,
}

impl ExperimentSpaceBuilder {
    /// Flag definitions will be checked against the types declared in `declared`.
    pub fn new(declared: &FlagRegistry) -> Self {
        ExperimentSpaceBuilder {
            declared: declared.declared().into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn add_flag_definition(&mut self, definition: FlagDefinition) -> Result<(), ValidationError> {
        if self.flags.contains_key(&definition.name) {
            return Err(ValidationError::DuplicateFlag(definition.name));
        }
        let defined = definition.calculator.flag_type();
        if let Some(&declared) = self.declared.get(&definition.name)
            && declared != defined
        {
            return Err(ValidationError::FlagTypeMismatch {
                name: definition.name,
                defined,
                declared,
            });
        }
        self.flags
            .insert(definition.name, Arc::new(definition.calculator));
        Ok(())
    }

    pub fn add_diversion_criterion(
        &mut self,
        criterion: DiversionCriterion,
    ) -> Result<(), ValidationError> {
        if criterion.num_buckets <= 0 {
            return Err(ValidationError::InvalidBucketCount {
                id: criterion.id,
                num_buckets: criterion.num_buckets,
            });
        }
        if self.criteria.contains_key(&criterion.id) {
            return Err(ValidationError::DuplicateCriterion(criterion.id));
        }
        self.criteria.insert(criterion.id, criterion);
        Ok(())
    }

    pub fn add_layer(&mut self, info: LayerInfo) -> Result<(), ValidationError> {
        if self.layers.contains_key(&info.id) {
            return Err(ValidationError::DuplicateLayer(info.id));
        }
        if info.launch && !info.is_top_level() {
            return Err(ValidationError::LaunchLayerInDomain {
                layer_id: info.id,
                domain_id: info.domain_id,
            });
        }
        if !info.is_top_level() && !self.domains.contains(&info.domain_id) {
            if self.segment_layers.contains_key(&info.domain_id) {
                return Err(ValidationError::NotADomain {
                    layer_id: info.id,
                    segment_id: info.domain_id,
                });
            }
            return Err(ValidationError::UnknownDomain {
                layer_id: info.id,
                domain_id: info.domain_id,
            });
        }

        self.layer_order.push(info.id);
        self.layers.insert(info.id, LayerBuilder::new(info));
        Ok(())
    }

    pub fn add_segment(&mut self, segment: SegmentDefinition) -> Result<(), ValidationError> {
        let info = segment.info();
        let (segment_id, layer_id) = (info.id, info.layer_id);
        if segment_id == DEFAULT_DOMAIN {
            return Err(ValidationError::ReservedSegmentId);
        }
        if self.segment_layers.contains_key(&segment_id) {
            return Err(ValidationError::DuplicateSegment(segment_id));
        }
        if !self.layers.contains_key(&layer_id) {
            return Err(ValidationError::UnknownLayer {
                segment_id,
                layer_id,
            });
        }
        let criterion = *self.criteria.get(&info.diversion_id).ok_or(
            ValidationError::UnknownCriterion {
                segment_id,
                diversion_id: info.diversion_id,
            },
        )?;
        for window in [info.active, info.overrides_window] {
            if window.start_msec > window.end_msec {
                return Err(ValidationError::InvalidWindow {
                    segment_id,
                    start_msec: window.start_msec,
                    end_msec: window.end_msec,
                });
            }
        }
        if let SegmentDefinition::Experiment { overrides, .. } = &segment {
            for (flag, flag_override) in overrides {
                let calculator = self.flags.get(flag).ok_or_else(|| ValidationError::UnknownFlag {
                    segment_id,
                    flag: flag.clone(),
                })?;
                flag_override
                    .check_type(calculator.flag_type())
                    .map_err(|source| ValidationError::InvalidOverride {
                        segment_id,
                        flag: flag.clone(),
                        source,
                    })?;
            }
        }

        let is_domain = matches!(segment, SegmentDefinition::Domain(_));
        if let Some(layer) = self.layers.get_mut(&layer_id) {
            layer.add_segment(segment, &criterion)?;
        }
        self.segment_layers.insert(segment_id, layer_id);
        if is_domain {
            self.domains.insert(segment_id);
        }
        Ok(())
    }

    /// Adds a complete, unordered definition.
    ///
    /// Layers and segments are added in passes: each pass adds the layers whose
    /// domain is known, then the segments whose layer is known. A pass that
    /// adds no layer means the remaining layers can never be resolved.
    pub fn add_definition(&mut self, definition: SpaceDefinition) -> Result<(), ValidationError> {
        for flag in definition.flags {
            self.add_flag_definition(flag)?;
        }
        for criterion in definition.criteria {
            self.add_diversion_criterion(criterion)?;
        }

        let mut pending_layers = definition.layers;
        let mut pending_segments = definition.segments;
        while !pending_layers.is_empty() {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending_layers
                .into_iter()
                .partition(|layer| layer.is_top_level() || self.domains.contains(&layer.domain_id));
            if ready.is_empty() {
                return Err(self.unresolved(&waiting, &pending_segments));
            }
            for layer in ready {
                self.add_layer(layer)?;
            }
            pending_layers = waiting;

            let (ready, waiting): (Vec<_>, Vec<_>) = pending_segments
                .into_iter()
                .partition(|segment| self.layers.contains_key(&segment.info().layer_id));
            for segment in ready {
                self.add_segment(segment)?;
            }
            pending_segments = waiting;
        }

        if let Some(segment) = pending_segments.first() {
            return Err(ValidationError::UnknownLayer {
                segment_id: segment.info().id,
                layer_id: segment.info().layer_id,
            });
        }
        Ok(())
    }

    /// Explains why none of the waiting layers could be added.
    fn unresolved(&self, waiting: &[LayerInfo], pending: &[SegmentDefinition]) -> ValidationError {
        for layer in waiting {
            if layer.launch {
                return ValidationError::LaunchLayerInDomain {
                    layer_id: layer.id,
                    domain_id: layer.domain_id,
                };
            }
            if self.segment_layers.contains_key(&layer.domain_id) {
                return ValidationError::NotADomain {
                    layer_id: layer.id,
                    segment_id: layer.domain_id,
                };
            }
            match pending.iter().find(|s| s.info().id == layer.domain_id) {
                None => {
                    return ValidationError::UnknownDomain {
                        layer_id: layer.id,
                        domain_id: layer.domain_id,
                    };
                }
                Some(SegmentDefinition::Experiment { .. }) => {
                    return ValidationError::NotADomain {
                        layer_id: layer.id,
                        segment_id: layer.domain_id,
                    };
                }
                Some(SegmentDefinition::Domain(_)) => {}
            }
        }
        let mut layer_ids: Vec<LayerId> = waiting.iter().map(|layer| layer.id).collect();
        layer_ids.sort_unstable();
        ValidationError::UnresolvableDomains(layer_ids)
    }

    /// The layer followed by every layer enclosing it.
    fn lineage(&self, layer_id: LayerId) -> Vec<LayerId> {
        let mut lineage = Vec::new();
        let mut current = Some(layer_id);
        while let Some(id) = current {
            lineage.push(id);
            current = self
                .layers
                .get(&id)
                .filter(|layer| !layer.info.is_top_level())
                .and_then(|layer| self.segment_layers.get(&layer.info.domain_id))
                .copied();
        }
        lineage
    }

    /// Whether one layer is nested, at any depth, inside the other.
    fn overlapping(&self, first: LayerId, second: LayerId) -> bool {
        self.lineage(first).contains(&second) || self.lineage(second).contains(&first)
    }

    fn is_launch(&self, layer_id: LayerId) -> bool {
        self.layers
            .get(&layer_id)
            .is_some_and(|layer| layer.info.launch)
    }

    fn base_overrides(&self) -> HashMap<SegmentId, Overrides> {
        let mut base_overrides = HashMap::new();
        for layer in self.layers.values() {
            for (segment_id, overrides) in layer.experiments() {
                let computed: Overrides = overrides
                    .iter()
                    .filter_map(|(flag, flag_override)| {
                        let calculator = self.flags.get(flag)?;
                        Some((flag.clone(), Arc::new(flag_override.apply(calculator))))
                    })
                    .collect();
                base_overrides.insert(segment_id, computed);
            }
        }
        base_overrides
    }

    /// Checks flags overridden in more than one layer and computes how
    /// permanent experiments compose with launch experiments.
    fn launch_overrides(
        &self,
        base_overrides: &HashMap<SegmentId, Overrides>,
    ) -> Result<LaunchOverrides, ValidationError> {
        let mut flag_layers: BTreeMap<&str, BTreeSet<LayerId>> = BTreeMap::new();
        for (layer_id, layer) in &self.layers {
            for (_, overrides) in layer.experiments() {
                for flag in overrides.keys() {
                    flag_layers.entry(flag.as_str()).or_default().insert(*layer_id);
                }
            }
        }

        let mut launch_overrides = LaunchOverrides::new();
        for (flag, layer_ids) in flag_layers {
            if layer_ids.len() < 2 {
                continue;
            }
            let (launch, permanent): (Vec<LayerId>, Vec<LayerId>) =
                layer_ids.into_iter().partition(|id| self.is_launch(*id));
            if launch.len() > 1 {
                return Err(ValidationError::MultipleLaunchLayers {
                    flag: flag.to_string(),
                    layer_ids: launch,
                });
            }
            for (i, first) in permanent.iter().enumerate() {
                for second in &permanent[i + 1..] {
                    if self.overlapping(*first, *second) {
                        return Err(ValidationError::OverlappingLayers {
                            flag: flag.to_string(),
                            first: *first,
                            second: *second,
                        });
                    }
                }
            }

            let Some(launch_layer) = launch.first().and_then(|id| self.layers.get(id)) else {
                continue;
            };
            let launched: Vec<(SegmentId, &Arc<FlagValueCalculator>)> = launch_layer
                .experiments()
                .filter_map(|(id, _)| Some((id, base_overrides.get(&id)?.get(flag)?)))
                .collect();
            for layer in permanent.iter().filter_map(|id| self.layers.get(id)) {
                for (segment_id, overrides) in layer.experiments() {
                    let Some(flag_override) = overrides.get(flag) else {
                        continue;
                    };
                    for (launch_id, launch_calculator) in &launched {
                        launch_overrides
                            .entry(segment_id)
                            .or_default()
                            .entry(*launch_id)
                            .or_default()
                            .insert(flag.to_string(), Arc::new(flag_override.apply(launch_calculator)));
                    }
                }
            }
        }
        Ok(launch_overrides)
    }

    /// Validates cross-layer interactions and assembles the space, innermost
    /// layers first.
    pub fn build(mut self, version: impl Into<String>) -> Result<ExperimentSpace, ValidationError> {
        let mut base_overrides = self.base_overrides();
        let mut launch_overrides = self.launch_overrides(&base_overrides)?;

        let mut nested: HashMap<SegmentId, Vec<Layer>> = HashMap::new();
        let mut top_level = Vec::new();
        let mut segments = HashMap::new();
        for layer_id in self.layer_order.iter().rev() {
            let Some(builder) = self.layers.remove(layer_id) else {
                continue;
            };
            let mut layer_segments = Vec::with_capacity(builder.segments.len());
            for definition in builder.segments {
                let segment = match definition {
                    SegmentDefinition::Experiment { info, .. } => {
                        let experiment = Experiment {
                            base_overrides: base_overrides.remove(&info.id).unwrap_or_default(),
                            launch_overrides: launch_overrides.remove(&info.id).unwrap_or_default(),
                        };
                        Segment::new(info, SegmentKind::Experiment(experiment))
                    }
                    SegmentDefinition::Domain(info) => {
                        let mut layers = nested.remove(&info.id).unwrap_or_default();
                        layers.sort_by_key(Layer::id);
                        Segment::new(info, SegmentKind::Domain(layers))
                    }
                };
                let segment = Arc::new(segment);
                segments.insert(segment.id(), segment.clone());
                layer_segments.push(segment);
            }

            let layer = Layer::new(builder.info, layer_segments);
            if layer.info().is_top_level() {
                top_level.push(layer);
            } else {
                nested
                    .entry(layer.info().domain_id)
                    .or_default()
                    .push(layer);
            }
        }

        top_level.sort_by_key(Layer::id);
        let (launch_layers, permanent_layers): (Vec<Layer>, Vec<Layer>) =
            top_level.into_iter().partition(|layer| layer.info().launch);
        let version = version.into();
        tracing::debug!(
            version = %version,
            flags = self.flags.len(),
            segments = segments.len(),
            launch_layers = launch_layers.len(),
            permanent_layers = permanent_layers.len(),
            "Built experiment space"
        );

        Ok(ExperimentSpace::new(
            version,
            Arc::new(FlagSettings::new(self.flags.into_iter().collect())),
            segments,
            self.criteria.into_values().collect(),
            launch_layers,
            permanent_layers,
        ))
    }
}
