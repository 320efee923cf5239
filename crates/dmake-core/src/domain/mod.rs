//! Domain model: rules, task states, Space entries and ids.

pub mod entry;
pub mod ids;
pub mod rule;
pub mod state;

pub use entry::{CONFIG_JOB, CONFIG_PERIOD, Entry, Kind, Template};
pub use ids::{JobId, WorkerId};
pub use rule::{NodeContent, Rule, RuleSpec, RuleStub};
pub use state::TaskState;
