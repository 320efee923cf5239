//! Connector port: how a worker reaches the Space on each (re)join.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SpaceConfig;
use crate::ports::{ArtifactError, ArtifactStore};
use crate::space::{Space, SpaceError};

#[async_trait]
pub trait Connector: Send + Sync {
    /// Locate the Space. Connection failures are retried by the caller.
    async fn connect(&self) -> Result<Arc<dyn Space>, SpaceError>;

    /// Artifact store for one session on `space`. Dropped when the session
    /// ends, which lets its published entries expire.
    async fn open_store(&self, space: Arc<dyn Space>, config: &SpaceConfig) -> Result<Arc<dyn ArtifactStore>, ArtifactError>;
}
