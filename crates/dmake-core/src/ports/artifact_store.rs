//! ArtifactStore port: where rule outputs and source files live.

use async_trait::async_trait;
use thiserror::Error;

use crate::space::SpaceError;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact `{0}` does not exist")]
    Missing(String),

    #[error("artifact `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Space(#[from] SpaceError),
}

impl ArtifactError {
    pub fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether `name` exists in this store right now.
    async fn available(&self, name: &str) -> bool;

    /// Block until a local copy of `name` exists.
    async fn get(&self, name: &str) -> Result<(), ArtifactError>;

    /// Announce that `name` exists here so other stores can fetch it.
    async fn publish(&self, name: &str) -> Result<(), ArtifactError>;
}
