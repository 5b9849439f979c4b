//! The serialized form of an experiment space.
//!
//! Values are kept as raw scalars here and only typed once the flag they
//! belong to is known.

use std::fmt;

use serde::Deserialize;

/// A scalar as written in a document. `17`, `"17"` and `17.0` are all valid
/// spellings of an int flag value.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOperator {
    #[default]
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideOperator {
    Replace,
    Append,
    Prepend,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ConditionDocument {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Scalar>,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModifierDocument {
    pub value: Scalar,
    pub operator: String,
    #[serde(default)]
    pub conditions: Vec<ConditionDocument>,
    #[serde(default)]
    pub condition_merge_operator: MergeOperator,
    #[serde(default)]
    pub modifiers: Vec<ModifierDocument>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FlagDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub flag_type: String,
    pub base_value: Scalar,
    #[serde(default)]
    pub modifiers: Vec<ModifierDocument>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DiversionDocument {
    pub id: i32,
    pub num_buckets: i32,
    #[serde(default)]
    pub random: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct LayerDocument {
    pub id: i32,
    pub name: Option<String>,
    #[serde(default)]
    pub domain_id: i32,
    #[serde(default)]
    pub launch: bool,
    pub unbiased_id: i32,
    pub fixed_biased_id: i32,
    pub random_biased_id: i32,
}

/// A half-open range of buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct BucketRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct OverrideDocument {
    pub name: String,
    pub operator: OverrideOperator,
    /// Required for `replace`, ignored otherwise.
    pub base_value: Option<Scalar>,
    #[serde(default)]
    pub modifiers: Vec<ModifierDocument>,
}

/// An experiment, or a domain when `domain` is set.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExperimentDocument {
    pub id: i32,
    pub name: Option<String>,
    pub layer_id: i32,
    #[serde(default)]
    pub diversion_id: i32,
    #[serde(default)]
    pub domain: bool,
    #[serde(default)]
    pub buckets: Vec<i32>,
    #[serde(default)]
    pub bucket_ranges: Vec<BucketRange>,
    #[serde(default)]
    pub conditions: Vec<ConditionDocument>,
    #[serde(default)]
    pub condition_merge_operator: MergeOperator,
    pub start_time_msec: Option<i64>,
    pub end_time_msec: Option<i64>,
    pub pre_period_msec: Option<i64>,
    pub post_period_msec: Option<i64>,
    #[serde(default)]
    pub overrides: Vec<OverrideDocument>,
}

impl ExperimentDocument {
    /// Explicit buckets and bucket ranges, combined.
    pub fn all_buckets(&self) -> impl Iterator<Item = i32> + '_ {
        self.buckets.iter().copied().chain(
            self.bucket_ranges
                .iter()
                .flat_map(|range| range.start..range.end),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SpaceDocument {
    #[serde(default)]
    pub flags: Vec<FlagDocument>,
    #[serde(default)]
    pub diversions: Vec<DiversionDocument>,
    #[serde(default)]
    pub layers: Vec<LayerDocument>,
    #[serde(default)]
    pub experiments: Vec<ExperimentDocument>,
}

impl SpaceDocument {
    /// Appends the definitions of another chunk of the same payload.
    pub fn merge(&mut self, other: SpaceDocument) {
        self.flags.extend(other.flags);
        self.diversions.extend(other.diversions);
        self.layers.extend(other.layers);
        self.experiments.extend(other.experiments);
    }
}
