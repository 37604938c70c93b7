//! The `serve` command: HTTP server plus background upkeep.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dedup::spawn_eviction;
use crate::error::ServerResult;
use crate::routes::router;
use crate::session::{SESSION_PRUNE_INTERVAL, spawn_session_pruning};
use crate::signals::SignalHandler;
use crate::state::AppState;
use crate::store::ensure_database_dir;

/// Runs the server until SIGTERM or SIGINT.
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    if config.folder_id().is_none() {
        warn!("no Drive folder configured, photo endpoints will answer 500");
    }
    ensure_database_dir(&config.database.url).await?;

    let eviction_every = Duration::from_secs(config.dedup.eviction_interval_secs);
    let bind = config.server.bind.clone();
    let state = AppState::from_config(config).await?;

    let signals = SignalHandler::new();
    signals.spawn_listener();
    let eviction = spawn_eviction(Arc::clone(&state.dedup), eviction_every, signals.shutdown());
    let pruning = spawn_session_pruning(
        Arc::clone(&state.sessions),
        SESSION_PRUNE_INTERVAL,
        signals.shutdown(),
    );

    let listener = TcpListener::bind(bind.as_str()).await?;
    info!(addr = %listener.local_addr()?, "lifehub listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(signals.shutdown().wait())
        .await?;

    signals.trigger_shutdown();
    let _ = eviction.await;
    let _ = pruning.await;
    debug!("server stopped");
    Ok(())
}
