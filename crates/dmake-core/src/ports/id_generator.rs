//! Id generation for jobs and worker sessions.

use ulid::Ulid;

use crate::domain::{JobId, WorkerId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn job_id(&self) -> JobId;

    /// A fresh id per join, so a rejoining worker never reuses its old
    /// presence entry.
    fn worker_id(&self) -> WorkerId;
}

/// ULIDs stamped with the given clock's time.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn worker_id(&self) -> WorkerId {
        WorkerId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ids_are_unique() {
        let ids = UlidGenerator::new(SystemClock);
        assert_ne!(ids.worker_id(), ids.worker_id());
        assert_ne!(ids.job_id(), ids.job_id());
    }

    #[test]
    fn fixed_clock_pins_the_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(FixedClock::new(at));

        let a = ids.worker_id();
        let b = ids.worker_id();

        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }

    #[test]
    fn prefixes_distinguish_kinds() {
        let ids = UlidGenerator::new(SystemClock);
        assert!(ids.job_id().to_string().starts_with("job-"));
        assert!(ids.worker_id().to_string().starts_with("worker-"));
    }
}
