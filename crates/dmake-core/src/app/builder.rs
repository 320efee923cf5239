//! JobBuilder: source text to a validated dependency graph.
//!
//! Everything here fails fast: a job whose build file does not parse, whose
//! graph is inconsistent or whose sources are missing never starts.

use std::path::{Path, PathBuf};

use crate::graph::{self, Graph, GraphError};
use crate::impls::MakefileParser;
use crate::ports::{ArtifactStore, Parser, SyntaxError};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("No rule to make target `{0}`")]
    MissingSource(String),
}

pub struct JobBuilder {
    parser: Box<dyn Parser>,
    target: Option<String>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            parser: Box::new(MakefileParser::new()),
            target: None,
        }
    }

    /// Build this target instead of the first rule.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Parse `source` and build its graph. `file` only labels errors.
    pub fn build(&self, source: &str, file: Option<&str>) -> Result<Graph, BuildError> {
        let rules = self.parser.parse(source, file)?;
        tracing::debug!(rules = rules.len(), "parsed build file");
        let graph = graph::build(&rules, self.target.as_deref(), file)?;
        Ok(graph)
    }

    pub async fn build_file(&self, path: &Path) -> Result<Graph, BuildError> {
        let source = tokio::fs::read_to_string(path).await.map_err(|source| BuildError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = path.display().to_string();
        self.build(&source, Some(&file))
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that every source the entry point needs exists somewhere.
///
/// Reports the first missing source in graph order.
pub async fn check_sources(graph: &Graph, artifacts: &dyn ArtifactStore) -> Result<(), BuildError> {
    let Some(root) = graph.root() else {
        return Ok(());
    };
    let scope = graph.reachable(root);

    for id in graph.leaf_stubs() {
        if !scope.contains(&id) {
            continue;
        }
        let name = graph.name(id);
        if !artifacts.available(name).await {
            tracing::error!(source = name, "missing source");
            return Err(BuildError::MissingSource(name.to_string()));
        }
    }
    Ok(())
}
