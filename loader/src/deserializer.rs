use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use engine::calculate::{
    AssociativeOperator, CalculateError, FlagValueCalculator, FlagValueOverride, Modifier,
};
use engine::condition::{And, Condition, ConditionError, ConditionFactory, Not, Or, always_true};
use engine::space::{
    Bucket, CriterionId, DiversionCriterion, ExperimentSpaceBuilder, FlagDefinition, LayerInfo, SegmentDefinition,
    SegmentId, SegmentInfo, SpaceDefinition, TimeWindow,
};
use engine::value::{FlagType, Value, ValueError};
use engine::{ExperimentSpace, FlagRegistry, ValidationError};
use serde::Deserialize;

use crate::document::{
    ConditionDocument, ExperimentDocument, FlagDocument, MergeOperator, ModifierDocument,
    OverrideDocument, OverrideOperator, Scalar, SpaceDocument,
};
use crate::loader::Serialized;

/// Turns a serialized payload into a validated space.
pub trait SpaceDeserializer: Send + Sync {
    fn deserialize(&self, serialized: &Serialized) -> Result<ExperimentSpace, DeserializeError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// Guesses the format from a file extension, defaulting to YAML.
    pub fn from_path(path: &Path) -> Format {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// What a conversion error belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum Owner {
    Flag(String),
    Segment(SegmentId),
    Override { segment_id: SegmentId, flag: String },
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Flag(name) => write!(f, "flag {name}"),
            Owner::Segment(id) => write!(f, "segment {id}"),
            Owner::Override { segment_id, flag } => {
                write!(f, "override of flag {flag} in segment {segment_id}")
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DeserializeError {
    #[error("chunk {index} is not a valid YAML space document: {source}")]
    Yaml {
        index: usize,
        source: serde_yaml::Error,
    },

    #[error("chunk {index} is not a valid JSON space document: {source}")]
    Json {
        index: usize,
        source: serde_json::Error,
    },

    #[error("no flags are defined")]
    NoFlags,

    #[error("{owner}: {source}")]
    Value { owner: Owner, source: ValueError },

    #[error("{owner}: {source}")]
    Calculate { owner: Owner, source: CalculateError },

    #[error("{owner}: {source}")]
    Condition { owner: Owner, source: ConditionError },

    #[error("{0}: replace needs a base value")]
    MissingBaseValue(Owner),

    #[error("{0} is defined more than once")]
    DuplicateOverride(Owner),

    #[error("segment {segment_id} has an invalid bucket range [{start}, {end})")]
    InvalidBucketRange {
        segment_id: SegmentId,
        start: Bucket,
        end: Bucket,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Reads [`SpaceDocument`]s in YAML or JSON.
///
/// Flag definitions are checked against `flags`, and condition names are
/// resolved with `conditions`.
pub struct DocumentDeserializer {
    format: Format,
    flags: Arc<FlagRegistry>,
    conditions: Arc<dyn ConditionFactory>,
}

impl DocumentDeserializer {
    pub fn new(
        format: Format,
        flags: Arc<FlagRegistry>,
        conditions: Arc<dyn ConditionFactory>,
    ) -> Self {
        DocumentDeserializer {
            format,
            flags,
            conditions,
        }
    }

    /// Parses every chunk and merges them into one document. Blank chunks
    /// are skipped.
    pub fn parse(&self, chunks: &[bytes::Bytes]) -> Result<SpaceDocument, DeserializeError> {
        let mut merged = SpaceDocument::default();
        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let document: SpaceDocument = match self.format {
                Format::Yaml => serde_yaml::from_slice(chunk)
                    .map_err(|source| DeserializeError::Yaml { index, source })?,
                Format::Json => serde_json::from_slice(chunk)
                    .map_err(|source| DeserializeError::Json { index, source })?,
            };
            merged.merge(document);
        }
        Ok(merged)
    }

    /// Converts a document into typed definitions.
    pub fn definition(&self, document: SpaceDocument) -> Result<SpaceDefinition, DeserializeError> {
        if document.flags.is_empty() {
            return Err(DeserializeError::NoFlags);
        }

        let mut flag_types = HashMap::new();
        let mut flags = Vec::with_capacity(document.flags.len());
        for flag in &document.flags {
            let definition = self.flag(flag)?;
            flag_types
                .entry(flag.name.clone())
                .or_insert(definition.calculator.flag_type());
            flags.push(definition);
        }

        let num_buckets: HashMap<CriterionId, Bucket> = document
            .diversions
            .iter()
            .map(|d| (d.id, d.num_buckets))
            .collect();
        let segments = document
            .experiments
            .iter()
            .map(|experiment| self.segment(experiment, &flag_types, &num_buckets))
            .collect::<Result<_, _>>()?;

        Ok(SpaceDefinition {
            flags,
            criteria: document
                .diversions
                .iter()
                .map(|d| DiversionCriterion::new(d.id, d.num_buckets, d.random))
                .collect(),
            layers: document
                .layers
                .iter()
                .map(|layer| LayerInfo {
                    id: layer.id,
                    domain_id: layer.domain_id,
                    launch: layer.launch,
                    unbiased_id: layer.unbiased_id,
                    fixed_biased_id: layer.fixed_biased_id,
                    random_biased_id: layer.random_biased_id,
                })
                .collect(),
            segments,
        })
    }

    fn flag(&self, flag: &FlagDocument) -> Result<FlagDefinition, DeserializeError> {
        let owner = || Owner::Flag(flag.name.clone());
        let flag_type: FlagType = flag
            .flag_type
            .parse()
            .map_err(|source| DeserializeError::Value {
                owner: owner(),
                source,
            })?;
        let base = parse_value(flag_type, &flag.base_value, &owner)?;
        let modifiers = self.modifiers(&flag.modifiers, flag_type, &owner)?;
        let calculator = FlagValueCalculator::new(base, modifiers).map_err(|source| {
            DeserializeError::Calculate {
                owner: owner(),
                source,
            }
        })?;
        Ok(FlagDefinition::new(flag.name.clone(), calculator))
    }

    fn modifiers(
        &self,
        documents: &[ModifierDocument],
        flag_type: FlagType,
        owner: &dyn Fn() -> Owner,
    ) -> Result<Vec<Modifier>, DeserializeError> {
        documents
            .iter()
            .map(|document| {
                let calculate = |source| DeserializeError::Calculate {
                    owner: owner(),
                    source,
                };
                let value = parse_value(flag_type, &document.value, owner)?;
                let operator =
                    AssociativeOperator::resolve(&document.operator, flag_type).map_err(calculate)?;
                let condition = self.condition(
                    &document.conditions,
                    document.condition_merge_operator,
                    owner,
                )?;
                let children = self.modifiers(&document.modifiers, flag_type, owner)?;
                Modifier::new(value, operator, condition, children).map_err(calculate)
            })
            .collect()
    }

    fn condition(
        &self,
        documents: &[ConditionDocument],
        merge: MergeOperator,
        owner: &dyn Fn() -> Owner,
    ) -> Result<Arc<dyn Condition>, DeserializeError> {
        let mut conditions = Vec::with_capacity(documents.len());
        for document in documents {
            let args: Vec<String> = document.args.iter().map(Scalar::to_string).collect();
            let condition = self
                .conditions
                .create(&document.name, &args)
                .map_err(|source| DeserializeError::Condition {
                    owner: owner(),
                    source,
                })?;
            conditions.push(if document.negate {
                Arc::new(Not(condition)) as Arc<dyn Condition>
            } else {
                condition
            });
        }

        Ok(match (conditions.len(), merge) {
            (0, _) => always_true(),
            (1, _) => conditions.remove(0),
            (_, MergeOperator::And) => Arc::new(And::new(conditions)),
            (_, MergeOperator::Or) => Arc::new(Or::new(conditions)),
        })
    }

    fn segment(
        &self,
        experiment: &ExperimentDocument,
        flag_types: &HashMap<String, FlagType>,
        num_buckets: &HashMap<CriterionId, Bucket>,
    ) -> Result<SegmentDefinition, DeserializeError> {
        let segment_id = experiment.id;
        check_bucket_ranges(experiment, num_buckets)?;
        let condition = self.condition(
            &experiment.conditions,
            experiment.condition_merge_operator,
            &|| Owner::Segment(segment_id),
        )?;
        let info = SegmentInfo::new(
            segment_id,
            experiment.layer_id,
            experiment.diversion_id,
            experiment.all_buckets(),
        )
        .with_condition(condition)
        .with_active_window(window(experiment.start_time_msec, experiment.end_time_msec))
        .with_overrides_window(window(
            experiment.pre_period_msec,
            experiment.post_period_msec,
        ));

        if experiment.domain {
            if !experiment.overrides.is_empty() {
                tracing::warn!(segment_id, "Ignoring overrides declared on a domain");
            }
            return Ok(SegmentDefinition::Domain(info));
        }

        let mut overrides = BTreeMap::new();
        for document in &experiment.overrides {
            let flag_type = *flag_types.get(&document.name).ok_or_else(|| {
                ValidationError::UnknownFlag {
                    segment_id,
                    flag: document.name.clone(),
                }
            })?;
            let flag_override = self.flag_override(segment_id, document, flag_type)?;
            if overrides
                .insert(document.name.clone(), flag_override)
                .is_some()
            {
                return Err(DeserializeError::DuplicateOverride(Owner::Override {
                    segment_id,
                    flag: document.name.clone(),
                }));
            }
        }
        Ok(SegmentDefinition::Experiment { info, overrides })
    }

    fn flag_override(
        &self,
        segment_id: SegmentId,
        document: &OverrideDocument,
        flag_type: FlagType,
    ) -> Result<FlagValueOverride, DeserializeError> {
        let owner = || Owner::Override {
            segment_id,
            flag: document.name.clone(),
        };
        let modifiers = self.modifiers(&document.modifiers, flag_type, &owner)?;
        Ok(match document.operator {
            OverrideOperator::Replace => {
                let base = document
                    .base_value
                    .as_ref()
                    .ok_or_else(|| DeserializeError::MissingBaseValue(owner()))?;
                let base = parse_value(flag_type, base, &owner)?;
                let calculator = FlagValueCalculator::new(base, modifiers).map_err(|source| {
                    DeserializeError::Calculate {
                        owner: owner(),
                        source,
                    }
                })?;
                FlagValueOverride::Replace(calculator)
            }
            OverrideOperator::Append => FlagValueOverride::Append(modifiers),
            OverrideOperator::Prepend => FlagValueOverride::Prepend(modifiers),
        })
    }
}

impl SpaceDeserializer for DocumentDeserializer {
    fn deserialize(&self, serialized: &Serialized) -> Result<ExperimentSpace, DeserializeError> {
        let document = self.parse(&serialized.chunks)?;
        tracing::debug!(
            version = %serialized.version,
            flags = document.flags.len(),
            layers = document.layers.len(),
            experiments = document.experiments.len(),
            "Parsed space document"
        );
        let definition = self.definition(document)?;
        let mut builder = ExperimentSpaceBuilder::new(&self.flags);
        builder.add_definition(definition)?;
        Ok(builder.build(serialized.version.clone())?)
    }
}

fn parse_value(
    flag_type: FlagType,
    raw: &Scalar,
    owner: &dyn Fn() -> Owner,
) -> Result<Value, DeserializeError> {
    Value::parse(flag_type, &raw.to_string()).map_err(|source| DeserializeError::Value {
        owner: owner(),
        source,
    })
}

/// Ranges are expanded into single buckets, so they are bounded first.
fn check_bucket_ranges(
    experiment: &ExperimentDocument,
    num_buckets: &HashMap<CriterionId, Bucket>,
) -> Result<(), DeserializeError> {
    let segment_id = experiment.id;
    for range in &experiment.bucket_ranges {
        if range.start < 0 || range.end < range.start {
            return Err(DeserializeError::InvalidBucketRange {
                segment_id,
                start: range.start,
                end: range.end,
            });
        }
        if range.start == range.end {
            continue;
        }
        let Some(&num_buckets) = num_buckets.get(&experiment.diversion_id) else {
            return Err(ValidationError::UnknownCriterion {
                segment_id,
                diversion_id: experiment.diversion_id,
            }
            .into());
        };
        if range.end > num_buckets {
            return Err(ValidationError::BucketOutOfRange {
                segment_id,
                bucket: range.end - 1,
                num_buckets,
            }
            .into());
        }
    }
    Ok(())
}

fn window(start: Option<i64>, end: Option<i64>) -> TimeWindow {
    TimeWindow::new(
        start.unwrap_or(TimeWindow::ALWAYS.start_msec),
        end.unwrap_or(TimeWindow::ALWAYS.end_msec),
    )
}
