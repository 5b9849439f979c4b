use std::collections::{BTreeMap, BTreeSet};

use crate::calculate::CalculateError;
use crate::space::{Bucket, CriterionId, LayerId, SegmentId};
use crate::value::FlagType;

/// Why a configuration was rejected. Any of these aborts the whole build.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("flag {0} is defined more than once")]
    DuplicateFlag(String),

    #[error("flag {name} is defined as {defined} but declared as {declared}")]
    FlagTypeMismatch {
        name: String,
        defined: FlagType,
        declared: FlagType,
    },

    #[error("diversion criterion {0} is defined more than once")]
    DuplicateCriterion(CriterionId),

    #[error("diversion criterion {id} needs a positive bucket count, got {num_buckets}")]
    InvalidBucketCount { id: CriterionId, num_buckets: Bucket },

    #[error("layer {0} is defined more than once")]
    DuplicateLayer(LayerId),

    #[error("launch layer {layer_id} must be top-level, found in domain {domain_id}")]
    LaunchLayerInDomain { layer_id: LayerId, domain_id: SegmentId },

    #[error("layer {layer_id} references unknown domain {domain_id}")]
    UnknownDomain { layer_id: LayerId, domain_id: SegmentId },

    #[error("layer {layer_id} is nested in segment {segment_id}, which is not a domain")]
    NotADomain { layer_id: LayerId, segment_id: SegmentId },

    #[error("cannot resolve the domains of layers {0:?}, their nesting is cyclic")]
    UnresolvableDomains(Vec<LayerId>),

    #[error("segment {0} is defined more than once")]
    DuplicateSegment(SegmentId),

    #[error("segment id 0 is reserved for the default domain")]
    ReservedSegmentId,

    #[error("segment {segment_id} references unknown layer {layer_id}")]
    UnknownLayer { segment_id: SegmentId, layer_id: LayerId },

    #[error("segment {segment_id} references unknown diversion criterion {diversion_id}")]
    UnknownCriterion {
        segment_id: SegmentId,
        diversion_id: CriterionId,
    },

    #[error("segment {segment_id} claims negative bucket {bucket}")]
    NegativeBucket { segment_id: SegmentId, bucket: Bucket },

    #[error("segment {segment_id} claims bucket {bucket}, but its criterion only has {num_buckets}")]
    BucketOutOfRange {
        segment_id: SegmentId,
        bucket: Bucket,
        num_buckets: Bucket,
    },

    #[error("segment {segment_id} claims buckets already allocated in layer {layer_id}: {conflicts:?}")]
    OverlappingBuckets {
        segment_id: SegmentId,
        layer_id: LayerId,
        /// Conflicting buckets, keyed by the segment that owns them.
        conflicts: BTreeMap<SegmentId, BTreeSet<Bucket>>,
    },

    #[error("segment {segment_id} has an inverted time window [{start_msec}, {end_msec})")]
    InvalidWindow {
        segment_id: SegmentId,
        start_msec: i64,
        end_msec: i64,
    },

    #[error("segment {segment_id} overrides undefined flag {flag}")]
    UnknownFlag { segment_id: SegmentId, flag: String },

    #[error("segment {segment_id} has an invalid override for flag {flag}: {source}")]
    InvalidOverride {
        segment_id: SegmentId,
        flag: String,
        source: CalculateError,
    },

    #[error("flag {flag} is overridden in more than one launch layer: {layer_ids:?}")]
    MultipleLaunchLayers { flag: String, layer_ids: Vec<LayerId> },

    #[error("flag {flag} is overridden across overlapping layers {first} and {second}")]
    OverlappingLayers {
        flag: String,
        first: LayerId,
        second: LayerId,
    },
}
