//! CourseQuest gamification companion service
//!
//! - Axum HTTP + WebSocket API over the gamification store
//! - Background event polling while a session is logged in
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GAMIFY_CONFIG_PATH  : path to TOML engine config
//!   GAMIFY_API_BASE_URL : overrides [api].base_url
//!   GAMIFY_API_TOKEN    : logs in at startup when set
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use coursequest_gamify::routes::build_router;
use coursequest_gamify::state::AppState;
use coursequest_gamify::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Config, optional auto-login and initial load.
  let state = Arc::new(AppState::from_env().await);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "coursequest_gamify", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  // Stop polling before exit.
  state.logout().await;
  info!(target: "coursequest_gamify", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "coursequest_gamify", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "coursequest_gamify", "Shutdown signal received");
}
