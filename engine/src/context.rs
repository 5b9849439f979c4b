//! The per-request inputs that diversion reads.

use std::collections::{BTreeSet, HashMap};

use crate::space::{CriterionId, SegmentId};

static NO_FORCED_IDS: BTreeSet<SegmentId> = BTreeSet::new();

/// Implemented by the host for whatever it considers a request.
///
/// Every value must be stable for the lifetime of the request: diversion may
/// ask for the same identifier many times and expects the same answer.
pub trait DiversionContext {
    /// The stable identifier (cookie, user id, ...) used to bucket the request
    /// under the given diversion criterion, if the request carries one.
    fn diversion_identifier(&self, criterion_id: CriterionId) -> Option<&str>;

    /// Experiment ids to divert into directly, bypassing bucket assignment.
    fn forced_experiment_ids(&self) -> &BTreeSet<SegmentId> {
        &NO_FORCED_IDS
    }

    /// Creation time of the request in milliseconds since the epoch.
    fn request_time_msec(&self) -> i64;

    /// A named request property for condition functions to inspect.
    fn attribute(&self, _name: &str) -> Option<&str> {
        None
    }
}

pub(crate) fn now_msec() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A context assembled up front from plain values.
#[derive(Clone, Debug)]
pub struct StaticContext {
    identifiers: HashMap<CriterionId, String>,
    forced: BTreeSet<SegmentId>,
    attributes: HashMap<String, String>,
    request_time_msec: i64,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContext {
    /// Creates an empty context stamped with the current time.
    pub fn new() -> Self {
        StaticContext {
            identifiers: HashMap::new(),
            forced: BTreeSet::new(),
            attributes: HashMap::new(),
            request_time_msec: now_msec(),
        }
    }

    pub fn with_identifier(mut self, criterion_id: CriterionId, identifier: impl Into<String>) -> Self {
        self.identifiers.insert(criterion_id, identifier.into());
        self
    }

    pub fn with_forced_ids(mut self, ids: impl IntoIterator<Item = SegmentId>) -> Self {
        self.forced.extend(ids);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_request_time(mut self, request_time_msec: i64) -> Self {
        self.request_time_msec = request_time_msec;
        self
    }
}

impl DiversionContext for StaticContext {
    fn diversion_identifier(&self, criterion_id: CriterionId) -> Option<&str> {
        self.identifiers.get(&criterion_id).map(String::as_str)
    }

    fn forced_experiment_ids(&self) -> &BTreeSet<SegmentId> {
        &self.forced
    }

    fn request_time_msec(&self) -> i64 {
        self.request_time_msec
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
