use thiserror::Error;

use crate::app::{BuildError, DriverError, WorkerError};
use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::ports::{ArtifactError, SyntaxError};
use crate::space::SpaceError;

#[derive(Debug, Error)]
pub enum DmakeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, DmakeError>;
