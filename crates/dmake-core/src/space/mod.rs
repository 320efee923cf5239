//! Coordination Space: a shared, lease-aware, pattern-matched store of
//! entries.
//!
//! The Space is the only shared mutable resource in a job. The driver hosts
//! one [`InMemorySpace`]; workers talk to it through [`RemoteSpace`] over
//! TCP, or share the instance directly when everything runs in one process.
//! Both implement [`Space`], so schedulers are written once against the
//! trait.

mod lease;
mod memory;
mod notify;
mod remote;
mod wire;

pub use lease::LeaseGuard;
pub use memory::InMemorySpace;
pub use notify::{EventKind, SpaceEvent, Subscription};
pub use remote::{RemoteSpace, SpaceServer};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Entry, Template};

/// Handle naming one written entry. Only its writer learns it, so only the
/// writer can renew or cancel the entry's lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseId(pub(crate) u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// How long a blocking operation may wait for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wait {
    Forever,
    For(Duration),
}

impl Wait {
    /// Non-blocking: fail fast with `NoMatch`.
    pub const NOW: Wait = Wait::For(Duration::ZERO);
}

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("no entry matches {0:?}")]
    NoMatch(Template),

    #[error("{0} is not held (expired, cancelled or never leased)")]
    LeaseNotFound(LeaseId),

    #[error("space is closed")]
    Closed,

    #[error("space unreachable: {0}")]
    Unreachable(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SpaceError {
    /// Transport or shutdown failures: the Space itself is gone, as opposed
    /// to an operation that simply found nothing.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SpaceError::Closed | SpaceError::Unreachable(_))
    }
}

/// Operations every Space handle supports.
///
/// Two concurrent `take` calls with overlapping templates never return the
/// same entry. Among several matches the oldest entry wins.
#[async_trait]
pub trait Space: Send + Sync {
    /// Insert `entry`. With `lease`, the entry is removed (an `Expire` event)
    /// once the lease elapses without renewal.
    async fn write(&self, entry: Entry, lease: Option<Duration>) -> Result<LeaseId, SpaceError>;

    /// Remove and return one entry matching `template`, waiting per `wait`.
    async fn take(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError>;

    /// Like `take` without removing the entry.
    async fn read(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError>;

    /// Every entry currently matching `template`, oldest first.
    async fn read_all(&self, template: &Template) -> Result<Vec<Entry>, SpaceError>;

    /// Extend a leased entry so that it expires `period` from now.
    async fn renew(&self, lease: LeaseId, period: Duration) -> Result<(), SpaceError>;

    /// Remove the entry named by `lease`, as an explicit take.
    async fn cancel(&self, lease: LeaseId) -> Result<Entry, SpaceError>;
}
