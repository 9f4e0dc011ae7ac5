//! WebSocket upgrade + push loop. The server sends a snapshot on connect and
//! again after every store change; clients may send dismissals and pings.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::store::GamificationStore;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "coursequest_gamify", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  match socket.send(Message::Text(out)).await {
    Ok(()) => true,
    Err(e) => {
      error!(target: "coursequest_gamify", error = %e, "WS send error");
      false
    }
  }
}

async fn push_snapshot(socket: &mut WebSocket, store: &GamificationStore) -> bool {
  let snapshot = Box::new(store.snapshot().await);
  send(socket, &ServerWsMessage::Snapshot { snapshot }).await
}

/// Still the active session's store?
async fn is_current(state: &AppState, store: &Arc<GamificationStore>) -> bool {
  matches!(state.store().await, Ok(s) if Arc::ptr_eq(&s, store))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let store = match state.store().await {
    Ok(s) => s,
    Err(e) => {
      send(&mut socket, &ServerWsMessage::Error { message: e.to_string() }).await;
      return;
    }
  };
  info!(target: "coursequest_gamify", "WebSocket connected");

  let mut revisions = store.subscribe();
  if !push_snapshot(&mut socket, &store).await {
    return;
  }

  loop {
    tokio::select! {
      changed = revisions.changed() => {
        if changed.is_err() || !is_current(&state, &store).await {
          send(&mut socket, &ServerWsMessage::LoggedOut).await;
          break;
        }
        if !push_snapshot(&mut socket, &store).await {
          break;
        }
      }
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(incoming) => {
              debug!(target: "coursequest_gamify", ?incoming, "WS received");
              handle_client_ws(incoming, &store).await;
            }
            Err(e) => {
              if !send(&mut socket, &ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }).await {
                break;
              }
            }
          },
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
    }
  }
  info!(target: "coursequest_gamify", "WebSocket disconnected");
}

/// Dismissals change the store; the resulting snapshot goes out via the
/// revision channel.
async fn handle_client_ws(msg: ClientWsMessage, store: &GamificationStore) {
  match msg {
    ClientWsMessage::Ping => {}
    ClientWsMessage::DismissPopup { id } => { store.dismiss_xp_popup(&id).await; }
    ClientWsMessage::DismissLevelUp => { store.dismiss_level_up().await; }
    ClientWsMessage::DismissBadge => { store.dismiss_badge_unlock().await; }
  }
}
