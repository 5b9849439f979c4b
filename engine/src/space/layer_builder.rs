use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Bucket, CriterionId, DiversionCriterion, LayerInfo, SegmentDefinition, SegmentId};
use crate::calculate::FlagValueOverride;
use crate::error::ValidationError;

/// Collects the segments of one layer and keeps their buckets disjoint.
#[derive(Debug)]
pub(crate) struct LayerBuilder {
    pub info: LayerInfo,
    pub segments: Vec<SegmentDefinition>,
    allocated: HashMap<CriterionId, BTreeMap<Bucket, SegmentId>>,
}

impl LayerBuilder {
    pub fn new(info: LayerInfo) -> Self {
        LayerBuilder {
            info,
            segments: Vec::new(),
            allocated: HashMap::new(),
        }
    }

    /// The experiments of this layer with their declared overrides.
    pub fn experiments(
        &self,
    ) -> impl Iterator<Item = (SegmentId, &BTreeMap<String, FlagValueOverride>)> {
        self.segments.iter().filter_map(|segment| match segment {
            SegmentDefinition::Experiment { info, overrides } => Some((info.id, overrides)),
            SegmentDefinition::Domain(_) => None,
        })
    }

    pub fn add_segment(
        &mut self,
        segment: SegmentDefinition,
        criterion: &DiversionCriterion,
    ) -> Result<(), ValidationError> {
        let info = segment.info();
        for &bucket in &info.buckets {
            if bucket < 0 {
                return Err(ValidationError::NegativeBucket {
                    segment_id: info.id,
                    bucket,
                });
            }
            if bucket >= criterion.num_buckets {
                return Err(ValidationError::BucketOutOfRange {
                    segment_id: info.id,
                    bucket,
                    num_buckets: criterion.num_buckets,
                });
            }
        }

        let allocated = self.allocated.entry(criterion.id).or_default();
        let mut conflicts: BTreeMap<SegmentId, BTreeSet<Bucket>> = BTreeMap::new();
        for bucket in &info.buckets {
            if let Some(owner) = allocated.get(bucket) {
                conflicts.entry(*owner).or_default().insert(*bucket);
            }
        }
        if !conflicts.is_empty() {
            return Err(ValidationError::OverlappingBuckets {
                segment_id: info.id,
                layer_id: self.info.id,
                conflicts,
            });
        }

        for bucket in &info.buckets {
            allocated.insert(*bucket, info.id);
        }
        self.segments.push(segment);
        Ok(())
    }
}
