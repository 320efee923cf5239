//! Dependency graph model and its builder.

mod builder;
mod node;

pub use builder::{GraphError, GraphErrorKind, build};
pub use node::{Graph, Node, NodeId};
