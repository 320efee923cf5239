//! Job outcome as returned by the driver.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The entry point is done.
    Completed,
    /// A task reported failure; nothing further was dispatched.
    Failed { rule: String },
    /// Dry run: graph checked, nothing dispatched.
    DryRun,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: String,
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// `todo` entries written, restores included.
    pub tasks_dispatched: usize,
    pub tasks_completed: usize,
    pub tasks_restored: usize,
    /// When the first task was claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// Time from the first claim to the end of the job.
    pub elapsed: Option<Duration>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, JobOutcome::Failed { .. })
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            JobOutcome::Completed => write!(f, "job {} completed", self.job)?,
            JobOutcome::Failed { rule } => write!(f, "job {} failed at {rule}", self.job)?,
            JobOutcome::DryRun => write!(f, "job {} checked (dry run)", self.job)?,
        }
        write!(
            f,
            ": {} dispatched, {} completed, {} restored",
            self.tasks_dispatched, self.tasks_completed, self.tasks_restored
        )?;
        if let Some(elapsed) = self.elapsed {
            write!(f, " in {:.3}s", elapsed.as_secs_f64())?;
        }
        Ok(())
    }
}
