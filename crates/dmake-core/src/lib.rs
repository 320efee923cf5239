//! dmake-core
//!
//! Distributed make: a driver walks a rule dependency graph and hands ready
//! rules to workers through a shared, lease-aware coordination Space.
//!
//! # Modules
//! - **domain**: rules, task states, Space entries, typed ids
//! - **graph**: arena dependency graph and its builder
//! - **space**: the Space trait, the in-memory store, leases, subscriptions,
//!   TCP transport
//! - **ports**: collaborator traits (parser, artifact store, command runner,
//!   clock, id generator, connector)
//! - **impls**: default collaborators (Makefile parser, local artifact store,
//!   shell runner, TCP connector)
//! - **app**: job builder, driver and worker schedulers
//! - **config**: timing and process configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod impls;
pub mod ports;
pub mod space;

pub use error::{DmakeError, Result};
