use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Install a handler that cancels the returned token on SIGTERM or SIGINT.
///
/// The scheduler checks the token between ticks; jobs already on the
/// cluster keep running.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping the scheduler");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping the scheduler");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
