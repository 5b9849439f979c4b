use super::{Bucket, CriterionId};

/// A scheme for mapping requests to buckets.
///
/// Criteria are scanned in ascending id order, so the id doubles as priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiversionCriterion {
    pub id: CriterionId,
    pub num_buckets: Bucket,
    /// Draw a fresh bucket per request instead of hashing an identifier.
    pub random: bool,
}

impl DiversionCriterion {
    pub fn new(id: CriterionId, num_buckets: Bucket, random: bool) -> Self {
        DiversionCriterion {
            id,
            num_buckets,
            random,
        }
    }
}
