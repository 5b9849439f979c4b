use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// A payload fetched by a [`Loader`], not yet deserialized.
#[derive(Clone, Debug, PartialEq)]
pub struct Serialized {
    /// Identifies the content. Two payloads with the same version are assumed
    /// to describe the same space.
    pub version: String,
    /// Parts of one payload. Their definitions are concatenated.
    pub chunks: Vec<Bytes>,
}

impl Serialized {
    pub fn new(version: impl Into<String>, chunks: Vec<Bytes>) -> Self {
        Serialized {
            version: version.into(),
            chunks,
        }
    }

    pub fn single(version: impl Into<String>, chunk: impl Into<Bytes>) -> Self {
        Serialized::new(version, vec![chunk.into()])
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("could not read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Source of serialized experiment spaces.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Returns the current payload, or `None` when there is none to load yet.
    async fn get_serialized(&self) -> Result<Option<Serialized>, LoadError>;
}

/// Reads the payload from a single file. The version is the SHA-256 of the
/// content, so rewriting a file with identical content is not a change.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLoader { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Loader for FileLoader {
    async fn get_serialized(&self) -> Result<Option<Serialized>, LoadError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Space file does not exist");
                return Ok(None);
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let version = hex::encode(Sha256::digest(&content));
        Ok(Some(Serialized::single(version, content)))
    }
}

/// Serves whatever payload was last set. Used for embedding and in tests.
#[derive(Debug, Default)]
pub struct StaticLoader {
    payload: RwLock<Option<Serialized>>,
}

impl StaticLoader {
    pub fn new(payload: Option<Serialized>) -> Self {
        StaticLoader {
            payload: RwLock::new(payload),
        }
    }

    pub fn set(&self, payload: Option<Serialized>) {
        *self.payload.write() = payload;
    }
}

#[async_trait]
impl Loader for StaticLoader {
    async fn get_serialized(&self) -> Result<Option<Serialized>, LoadError> {
        Ok(self.payload.read().clone())
    }
}
