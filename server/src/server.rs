//! Acceptor lifecycle: serve until shutdown, then optionally drain.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;

use crate::routes;
use crate::state::AppState;

/// How often the drain loop re-checks the online count.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` resolves.
///
/// Every upgraded WebSocket runs in its own task, so a failing connection
/// never takes down the acceptor or its neighbours. Once `shutdown` fires
/// no new connections are accepted; sessions already online keep running.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let started = Instant::now();
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Relay server started");

    let app = routes::build_router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    tracing::info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Relay server closed"
    );
    result.map_err(Into::into)
}

/// Wait up to `limit` for online sessions to end on their own.
///
/// Returns the number of sessions still online when it gave up.
pub async fn drain(state: &AppState, limit: Duration) -> usize {
    let deadline = Instant::now() + limit;
    loop {
        let online = state.registry.count();
        if online == 0 || Instant::now() >= deadline {
            if online > 0 {
                tracing::info!(online, "Drain window elapsed with sessions still online");
            }
            return online;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutting down, no longer accepting connections");
}
