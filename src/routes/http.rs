//! HTTP endpoint handlers. These are thin wrappers that forward to the store.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::GamifyError;
use crate::protocol::*;
use crate::state::AppState;

impl IntoResponse for GamifyError {
  fn into_response(self) -> Response {
    let status = match &self {
      GamifyError::PreconditionFailed(_) => StatusCode::CONFLICT,
      GamifyError::NotAuthenticated => StatusCode::UNAUTHORIZED,
      GamifyError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
      GamifyError::Network(_) | GamifyError::Http { .. } | GamifyError::Decode(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorOut { error: self.to_string() })).into_response()
  }
}

type ApiResult<T> = Result<Json<T>, GamifyError>;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip_all)]
pub async fn http_login(State(state): State<Arc<AppState>>, Json(body): Json<LoginIn>) -> ApiResult<SessionOut> {
  state.login(body.token).await?;
  info!(target: "coursequest_gamify", "HTTP session login");
  Ok(Json(SessionOut { authenticated: true }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let was_active = state.logout().await;
  info!(target: "coursequest_gamify", %was_active, "HTTP session logout");
  Json(SessionOut { authenticated: false })
}

#[instrument(level = "debug", skip_all)]
pub async fn http_snapshot(State(state): State<Arc<AppState>>) -> Result<Response, GamifyError> {
  let store = state.store().await?;
  store.expire_popups(Utc::now()).await;
  Ok(Json(store.snapshot().await).into_response())
}

#[instrument(level = "info", skip_all)]
pub async fn http_refresh(State(state): State<Arc<AppState>>) -> ApiResult<RefreshOut> {
  let store = state.store().await?;
  let outcomes = store.fetch_all().await;
  Ok(Json(RefreshOut::from(&outcomes)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_leaderboard(
  State(state): State<Arc<AppState>>,
  Query(q): Query<PeriodQuery>,
) -> Result<Response, GamifyError> {
  let store = state.store().await?;
  let period = match q.parse() {
    Ok(p) => p.unwrap_or(store.options().default_period),
    Err(e) => return Ok((StatusCode::BAD_REQUEST, Json(ErrorOut { error: e.to_string() })).into_response()),
  };
  let outcome = store.fetch_leaderboard(period).await;
  Ok(Json(FetchOut::from(outcome)).into_response())
}

#[instrument(level = "info", skip(state))]
pub async fn http_claim(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<ClaimOut> {
  let store = state.store().await?;
  match store.claim_challenge(&id).await {
    Ok(outcome) => {
      info!(target: "gamification", challenge = %id, xp = outcome.xp_awarded, "HTTP claim succeeded");
      Ok(Json(outcome.into()))
    }
    Err(e) => {
      warn!(target: "gamification", challenge = %id, error = %e, "HTTP claim rejected");
      // Remote rejections are surfaced as conflicts too.
      Err(match e {
        GamifyError::Http { status: 409, message } => GamifyError::PreconditionFailed(message),
        other => other,
      })
    }
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_dismiss_popup(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<DismissOut> {
  let store = state.store().await?;
  Ok(Json(DismissOut { dismissed: store.dismiss_xp_popup(&id).await }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_dismiss_level_up(State(state): State<Arc<AppState>>) -> ApiResult<DismissOut> {
  let store = state.store().await?;
  Ok(Json(DismissOut { dismissed: store.dismiss_level_up().await.is_some() }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_dismiss_badge(State(state): State<Arc<AppState>>) -> ApiResult<DismissOut> {
  let store = state.store().await?;
  Ok(Json(DismissOut { dismissed: store.dismiss_badge_unlock().await.is_some() }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_event_history(
  State(state): State<Arc<AppState>>,
  Query(q): Query<HistoryQuery>,
) -> ApiResult<HistoryOut> {
  let store = state.store().await?;
  if let crate::store::FetchOutcome::Failed(e) = store.fetch_event_history(q.limit).await {
    return Err(e);
  }
  Ok(Json(HistoryOut { events: store.event_history().await, unread: store.unread_count().await }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_mark_read(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<HistoryOut> {
  let store = state.store().await?;
  store.mark_event_read(&id).await;
  Ok(Json(HistoryOut { events: store.event_history().await, unread: store.unread_count().await }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_mark_all_read(State(state): State<Arc<AppState>>) -> ApiResult<HistoryOut> {
  let store = state.store().await?;
  store.mark_all_events_read().await;
  Ok(Json(HistoryOut { events: store.event_history().await, unread: store.unread_count().await }))
}

#[instrument(level = "info", skip(state, body), fields(value = ?body.value))]
pub async fn http_vote(
  State(state): State<Arc<AppState>>,
  Path(post_id): Path<String>,
  Json(body): Json<VoteIn>,
) -> ApiResult<VoteOut> {
  let votes = state.votes().await?;
  let tally = votes.vote(&post_id, body.value).await?;
  Ok(Json(VoteOut { tally }))
}
