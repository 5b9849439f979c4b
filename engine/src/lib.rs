//! Traffic diversion and flag overrides.
//!
//! Requests are split across independent [`space::Layer`]s. In each layer a
//! request lands in at most one segment, chosen by hashing a stable
//! identifier into a bucket. Experiments override flag values; the overrides
//! of every experiment a request lands in are composed into the
//! [`settings::FlagSettings`] it reads flags from.
//!
//! The configuration is validated and assembled by
//! [`space::ExperimentSpaceBuilder`] and published through
//! [`handler::ExperimentHandler`], which swaps snapshots without blocking
//! readers.

pub mod calculate;
pub mod condition;
pub mod context;
pub mod error;
pub mod flag;
pub mod handler;
pub mod metrics_defs;
pub mod settings;
pub mod space;
pub mod state;
pub mod value;

#[cfg(test)]
mod testutils;

pub use context::{DiversionContext, StaticContext};
pub use error::ValidationError;
pub use flag::{Flag, FlagRegistry};
pub use handler::ExperimentHandler;
pub use space::{DiversionError, ExperimentSpace, ExperimentSpaceBuilder};
pub use state::RequestState;
pub use value::{FlagType, Value};
