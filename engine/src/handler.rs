use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use shared::counter;

use crate::context::DiversionContext;
use crate::metrics_defs::{
    DIVERSION_ASSIGNMENTS, DIVERSION_ERRORS, DIVERSION_NONE, DIVERSION_REQUESTS, SEGMENTS_DISABLED,
    SPACE_UPDATES,
};
use crate::space::{DiversionError, ExperimentSpace, SegmentId};
use crate::state::RequestState;

/// Entry point for request handling. Holds the currently published
/// [`ExperimentSpace`] and swaps it atomically on reload.
///
/// A request diverts against whichever snapshot it loaded first and keeps that
/// snapshot alive until it is done, so updates never block diversion.
#[derive(Debug)]
pub struct ExperimentHandler {
    space: ArcSwap<ExperimentSpace>,
}

impl Default for ExperimentHandler {
    fn default() -> Self {
        Self::new(ExperimentSpace::empty(""))
    }
}

impl ExperimentHandler {
    pub fn new(space: ExperimentSpace) -> Self {
        ExperimentHandler {
            space: ArcSwap::from_pointee(space),
        }
    }

    /// Diverts the request and installs the resulting flag settings.
    ///
    /// Can be called more than once per request. A layer is skipped once the
    /// request carries any id it can record, including its fallback ids and
    /// the segments of its domains. Forced ids already carried are not applied
    /// again. New overrides are layered on top of the settings from the
    /// previous call.
    pub fn handle<C: DiversionContext>(
        &self,
        state: &mut RequestState<C>,
    ) -> Result<(), DiversionError> {
        let space = self.space.load_full();
        let mut new_ids = BTreeSet::new();
        let settings = space
            .diversion(
                state.context(),
                state.experiment_ids(),
                state.flag_settings(),
                &mut new_ids,
            )
            .inspect_err(|e| {
                counter!(DIVERSION_ERRORS).increment(1);
                tracing::error!(
                    error = %e,
                    version = space.version_identifier(),
                    "Diversion failed, the experiment space is inconsistent"
                );
            })?;

        counter!(DIVERSION_REQUESTS).increment(1);
        if new_ids.is_empty() {
            counter!(DIVERSION_NONE).increment(1);
        }
        for id in &new_ids {
            counter!(DIVERSION_ASSIGNMENTS, "segment_id" => space.segment_label(*id)).increment(1);
        }
        tracing::trace!(ids = ?new_ids, "Diverted request");
        state.record_diversion(settings, new_ids);
        Ok(())
    }

    /// Turns a segment off in the current snapshot. Returns false if the
    /// snapshot has no segment with that id.
    pub fn disable(&self, id: SegmentId) -> bool {
        let space = self.space.load();
        if !space.disable(id) {
            return false;
        }
        counter!(SEGMENTS_DISABLED).increment(1);
        tracing::info!(
            segment_id = id,
            version = space.version_identifier(),
            "Disabled segment"
        );
        true
    }

    pub fn version_identifier(&self) -> String {
        self.space.load().version_identifier().to_string()
    }

    pub fn current(&self) -> Arc<ExperimentSpace> {
        self.space.load_full()
    }

    /// Publishes a new snapshot. Requests already diverting keep the old one.
    pub fn update(&self, space: ExperimentSpace) {
        tracing::info!(
            version = space.version_identifier(),
            segments = space.segment_count(),
            "Publishing experiment space"
        );
        counter!(SPACE_UPDATES).increment(1);
        self.space.store(Arc::new(space));
    }
}
