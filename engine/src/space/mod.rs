//! Layers, segments and the immutable snapshot they form.

mod builder;
mod criterion;
mod experiment_space;
mod layer;
mod layer_builder;
mod segment;

pub use builder::{ExperimentSpaceBuilder, FlagDefinition, SegmentDefinition, SpaceDefinition};
pub use criterion::DiversionCriterion;
pub use experiment_space::ExperimentSpace;
pub use layer::{Layer, LayerInfo, stable_bucket};
pub use segment::{Experiment, Segment, SegmentInfo, SegmentKind, TimeWindow};

pub type SegmentId = i32;
pub type LayerId = i32;
pub type CriterionId = i32;
pub type Bucket = i32;

/// Layers with this domain id sit directly in the space.
pub const DEFAULT_DOMAIN: SegmentId = 0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DiversionError {
    /// Bucket allocation guarantees at most one eligible segment per bucket,
    /// so reaching this means the snapshot was built incorrectly.
    #[error("segments {segment_ids:?} of layer {layer_id} are all valid for bucket {bucket}")]
    MultipleValidSegments {
        layer_id: LayerId,
        bucket: Bucket,
        segment_ids: Vec<SegmentId>,
    },
}
