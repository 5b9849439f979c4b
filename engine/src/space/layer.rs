use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use md5::{Digest, Md5};
use rand::Rng;

use super::segment::Scope;
use super::{
    Bucket, CriterionId, DEFAULT_DOMAIN, DiversionCriterion, DiversionError, LayerId, Segment,
    SegmentId, SegmentKind,
};
use crate::context::DiversionContext;
use crate::settings::Overrides;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerInfo {
    pub id: LayerId,
    /// The domain segment this layer is nested in, or [`DEFAULT_DOMAIN`].
    pub domain_id: SegmentId,
    pub launch: bool,
    /// Recorded when no segment claims the request's bucket.
    pub unbiased_id: SegmentId,
    /// Recorded when a segment claims a hashed bucket but rejects the request.
    pub fixed_biased_id: SegmentId,
    /// Recorded when a segment claims a random bucket but rejects the request.
    pub random_biased_id: SegmentId,
}

impl LayerInfo {
    pub fn is_top_level(&self) -> bool {
        self.domain_id == DEFAULT_DOMAIN
    }
}

/// Maps an identifier to a bucket in `[0, num_buckets)`.
///
/// The layer id is hashed in with the identifier so that one identifier lands
/// in unrelated buckets in different layers.
pub fn stable_bucket(layer_id: LayerId, identifier: &str, num_buckets: Bucket) -> Bucket {
    let mut hasher = Md5::new();
    hasher.update(layer_id.to_le_bytes());
    for unit in identifier.encode_utf16() {
        hasher.update(unit.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // The remainder is below num_buckets and therefore fits.
    i64::from_le_bytes(head).rem_euclid(i64::from(num_buckets)) as Bucket
}

/// An independent partition of traffic. A request ends up in at most one of
/// a layer's segments.
#[derive(Debug)]
pub struct Layer {
    info: LayerInfo,
    segments: Vec<Arc<Segment>>,
    // Every id a diversion through this layer can record: the fallback ids
    // and all segments reachable through its domains.
    owned_ids: BTreeSet<SegmentId>,
    by_bucket: HashMap<CriterionId, BTreeMap<Bucket, Vec<Arc<Segment>>>>,
}

impl Layer {
    pub(crate) fn new(info: LayerInfo, segments: Vec<Arc<Segment>>) -> Self {
        let mut owned_ids =
            BTreeSet::from([info.unbiased_id, info.fixed_biased_id, info.random_biased_id]);
        let mut by_bucket: HashMap<CriterionId, BTreeMap<Bucket, Vec<Arc<Segment>>>> =
            HashMap::new();
        for segment in &segments {
            match segment.kind() {
                SegmentKind::Experiment(_) => {
                    owned_ids.insert(segment.id());
                }
                SegmentKind::Domain(layers) => {
                    for layer in layers {
                        owned_ids.extend(layer.owned_ids());
                    }
                }
            }
            let buckets = by_bucket.entry(segment.info().diversion_id).or_default();
            for bucket in &segment.info().buckets {
                buckets.entry(*bucket).or_default().push(segment.clone());
            }
        }
        Layer {
            info,
            segments,
            owned_ids,
            by_bucket,
        }
    }

    pub(crate) fn owned_ids(&self) -> &BTreeSet<SegmentId> {
        &self.owned_ids
    }

    pub fn id(&self) -> LayerId {
        self.info.id
    }

    pub fn info(&self) -> &LayerInfo {
        &self.info
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    fn bucket(&self, criterion: &DiversionCriterion, ctx: &dyn DiversionContext) -> Option<Bucket> {
        if criterion.random {
            return Some(rand::rng().random_range(0..criterion.num_buckets));
        }
        ctx.diversion_identifier(criterion.id)
            .map(|identifier| stable_bucket(self.info.id, identifier, criterion.num_buckets))
    }

    fn claimed(&self, criterion_id: CriterionId, bucket: Bucket) -> Vec<&Arc<Segment>> {
        let Some(buckets) = self.by_bucket.get(&criterion_id) else {
            return Vec::new();
        };
        buckets
            .range(..=bucket)
            .next_back()
            .map(|(_, segments)| {
                segments
                    .iter()
                    .filter(|segment| segment.info().buckets.contains(&bucket))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn assign(
        &self,
        scope: &Scope<'_>,
        overrides: &mut Overrides,
        new_ids: &mut BTreeSet<SegmentId>,
    ) -> Result<(), DiversionError> {
        if !self.owned_ids.is_disjoint(scope.existing_ids) {
            return Ok(());
        }

        for criterion in scope.criteria {
            let Some(bucket) = self.bucket(criterion, scope.ctx) else {
                continue;
            };
            let claimed = self.claimed(criterion.id, bucket);
            if claimed.is_empty() {
                continue;
            }

            let valid: Vec<_> = claimed
                .into_iter()
                .filter(|segment| segment.is_valid_for(scope.ctx))
                .collect();
            return match valid.as_slice() {
                [] => {
                    new_ids.insert(if criterion.random {
                        self.info.random_biased_id
                    } else {
                        self.info.fixed_biased_id
                    });
                    Ok(())
                }
                [segment] => segment.handle(scope, overrides, new_ids),
                _ => Err(DiversionError::MultipleValidSegments {
                    layer_id: self.info.id,
                    bucket,
                    segment_ids: valid.iter().map(|segment| segment.id()).collect(),
                }),
            };
        }

        new_ids.insert(self.info.unbiased_id);
        Ok(())
    }
}
