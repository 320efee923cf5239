//! Background lease renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

use super::{LeaseId, Space, SpaceError};

/// Keeps one lease alive until dropped or stopped.
///
/// Renews every `interval` for `length`. Dropping the guard stops renewal,
/// after which the entry expires on its own unless cancelled.
pub struct LeaseGuard {
    lease: LeaseId,
    _stop: DropGuard,
}

impl LeaseGuard {
    pub fn spawn(space: Arc<dyn Space>, lease: LeaseId, length: Duration, interval: Duration) -> Self {
        let token = CancellationToken::new();
        tokio::spawn(renew_loop(space, lease, length, interval, token.clone()));
        Self {
            lease,
            _stop: token.drop_guard(),
        }
    }

    /// Stop renewing and hand back the lease id.
    pub fn stop(self) -> LeaseId {
        self.lease
    }
}

async fn renew_loop(
    space: Arc<dyn Space>,
    lease: LeaseId,
    length: Duration,
    interval: Duration,
    token: CancellationToken,
) {
    // interval_at panics on a zero period.
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match space.renew(lease, length).await {
            Ok(()) => tracing::trace!(%lease, "lease renewed"),
            Err(SpaceError::LeaseNotFound(_)) => {
                tracing::warn!(%lease, "lease lost before renewal");
                return;
            }
            Err(e) if e.is_connection_lost() => {
                tracing::warn!(%lease, error = %e, "space lost; renewal stopped");
                return;
            }
            Err(e) => tracing::warn!(%lease, error = %e, "lease renewal failed"),
        }
    }
}
