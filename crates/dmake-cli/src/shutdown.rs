use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// The driver aborts its event loop and workers leave their join loop when
/// it fires.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM; only SIGINT stops dmake");
                None
            }
        };

        tokio::select! {
            _ = async {
                match sigterm.as_mut() {
                    Some(sigterm) => { sigterm.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => tracing::info!("received SIGTERM, shutting down"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("received SIGINT, shutting down"),
                Err(e) => tracing::warn!(error = %e, "SIGINT listener failed, shutting down"),
            },
        }

        cancel.cancel();
    });

    token
}
