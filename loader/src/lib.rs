//! Getting experiment spaces into a running [`engine::ExperimentHandler`].
//!
//! A [`loader::Loader`] fetches serialized payloads, a
//! [`deserializer::SpaceDeserializer`] turns them into validated spaces, and
//! the [`reloader::Reloader`] publishes the result whenever the payload
//! version changes.

pub mod deserializer;
pub mod document;
pub mod loader;
pub mod metrics_defs;
pub mod reloader;

pub use deserializer::{DeserializeError, DocumentDeserializer, Format, SpaceDeserializer};
pub use loader::{FileLoader, LoadError, Loader, Serialized, StaticLoader};
pub use reloader::{Command, ReloadError, ReloadOutcome, Reloader};
