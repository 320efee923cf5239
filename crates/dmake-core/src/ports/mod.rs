//! Ports: the collaborators the schedulers consume.
//!
//! The schedulers only see these traits; `impls` has the defaults and the
//! end-to-end tests substitute in-memory doubles.

pub mod artifact_store;
pub mod clock;
pub mod command_runner;
pub mod connector;
pub mod id_generator;
pub mod parser;

pub use self::artifact_store::{ArtifactError, ArtifactStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::command_runner::{CommandOutput, CommandRunner};
pub use self::connector::Connector;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::parser::{Parser, SyntaxError};
