//! Application layer: the driver and worker schedulers built on the Space
//! and the ports.
//!
//! - **JobBuilder**: build file to validated graph
//! - **Driver**: hosts the Space and walks the graph
//! - **Worker**: claims and executes tasks, rejoining when the Space is lost
//! - **PriorityIndex**: optional claim ordering for workers
//! - **JobReport**: what a finished job looked like

pub mod builder;
pub mod driver;
pub mod priority;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, JobBuilder, check_sources};
pub use self::driver::{Driver, DriverError};
pub use self::priority::PriorityIndex;
pub use self::status::{JobOutcome, JobReport};
pub use self::worker_loop::{Worker, WorkerError};
