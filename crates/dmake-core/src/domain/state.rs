//! Task state carried by `task` entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of one logical task as seen in the Space.
///
/// State transitions (each one is a take of the old entry and a write of
/// the new one, so at most one entry per rule exists at a time):
/// - Todo -> (claimed) -> Working -> Done
/// - Todo -> (claimed) -> Working -> Failed
/// - Working -(lease expired)-> Todo
///
/// `Scheduled` is the driver's own liveness timer for a claimed task whose
/// worker has not written `Working` yet; it lives alongside the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be claimed by any worker.
    Todo,

    /// Claimed, waiting for the worker to confirm.
    Scheduled,

    /// Being executed; the entry is leased and renewed by the worker.
    Working,

    /// Executed successfully, artifact published.
    Done,

    /// Executed and failed.
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Todo => "todo",
            TaskState::Scheduled => "scheduled",
            TaskState::Working => "working",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskState::Todo),
            "scheduled" => Ok(TaskState::Scheduled),
            "working" => Ok(TaskState::Working),
            "done" => Ok(TaskState::Done),
            "failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::todo(TaskState::Todo)]
    #[case::scheduled(TaskState::Scheduled)]
    #[case::working(TaskState::Working)]
    #[case::done(TaskState::Done)]
    #[case::failed(TaskState::Failed)]
    fn display_parses_back(#[case] state: TaskState) {
        assert_eq!(state.to_string().parse::<TaskState>(), Ok(state));
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("phony".parse::<TaskState>().is_err());
    }
}
