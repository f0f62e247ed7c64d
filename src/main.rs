//! Gamify · challenge and quest backend
//!
//! - Axum JSON API under /api/v1
//! - Build passes posted by CI; state persisted as JSON per user and project
//! - Game events delivered to a logging notifier
//!
//! Important env variables:
//!   PORT             : u16 (default 3000)
//!   GAME_CONFIG_PATH : path to TOML config (project limits, reports, weights, achievements)
//!   LOG_LEVEL        : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT       : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use gamify_backend::events::{spawn_dispatcher, LogNotifier};
use gamify_backend::routes::build_router;
use gamify_backend::state::AppState;
use gamify_backend::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state (config, saved users, collaborators) plus the event receiver.
  let (state, events_rx) = AppState::from_env().await;
  let dispatcher = spawn_dispatcher(events_rx, Arc::new(LogNotifier));
  let state = Arc::new(state);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "gamify_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "gamify_backend", "Shutdown signal received");
    })
    .await?;

  // Dropping the last publisher lets the dispatcher drain and stop.
  drop(state);
  let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher).await;
  Ok(())
}
