//! Router assembly: HTTP endpoints, WebSocket push, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket snapshot push at `/ws`
/// - session + gamification API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers); tighten for production
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/v1/health", get(http::http_health))
        // Session
        .route("/api/v1/session/login", post(http::http_login))
        .route("/api/v1/session/logout", post(http::http_logout))
        // Store reads and refreshes
        .route("/api/v1/gamification", get(http::http_snapshot))
        .route("/api/v1/gamification/refresh", post(http::http_refresh))
        .route("/api/v1/leaderboard", post(http::http_leaderboard))
        // Actions
        .route("/api/v1/challenges/:id/claim", post(http::http_claim))
        .route("/api/v1/popups/:id/dismiss", post(http::http_dismiss_popup))
        .route("/api/v1/modals/level-up/dismiss", post(http::http_dismiss_level_up))
        .route("/api/v1/modals/badge/dismiss", post(http::http_dismiss_badge))
        // Event history
        .route("/api/v1/events/history", get(http::http_event_history))
        .route("/api/v1/events/read-all", post(http::http_mark_all_read))
        .route("/api/v1/events/:id/read", post(http::http_mark_read))
        // Forum
        .route("/api/v1/forum/posts/:id/vote", post(http::http_vote))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::{Challenge, ChallengeBoard, ChallengePeriod, ChallengeStatus, Difficulty, Profile};
    use crate::gateway::MockGateway;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    fn post_req(uri: &str) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn completed_challenge(id: &str, reward: i64) -> Challenge {
        Challenge {
            id: id.into(),
            title: "Watch 3 videos".into(),
            description: String::new(),
            icon: Default::default(),
            difficulty: Difficulty::Easy,
            period: ChallengePeriod::Daily,
            target: 3,
            current: 3,
            progress: 100.0,
            xp_reward: reward,
            expires_at: Utc::now() + chrono::Duration::hours(12),
            status: ChallengeStatus::Completed,
            completed_at: Some(Utc::now()),
            claimed_at: None,
        }
    }

    fn profile(total_xp: i64) -> Profile {
        let info = crate::derive::level_for_xp(total_xp as u64);
        Profile {
            total_xp,
            level: info.level,
            level_title: info.title,
            level_color: info.color,
            xp_for_current_level: info.xp_for_current_level,
            xp_for_next_level: info.xp_for_next_level,
            progress_percent: info.progress_percent,
            streak: Default::default(),
            stats: Default::default(),
            recent_xp_history: vec![],
        }
    }

    async fn logged_in() -> (Arc<AppState>, Arc<MockGateway>) {
        let state = Arc::new(AppState::new(EngineConfig::default()));
        let gw = Arc::new(MockGateway::new());
        gw.set_profile(profile(120));
        gw.set_challenges(ChallengeBoard { daily: vec![completed_challenge("d1", 50)], ..Default::default() });
        state.login_with(gw.clone()).await;
        let store = state.store().await.unwrap();
        while store.challenges().await.is_none() || store.profile().await.is_none() {
            store.fetch_challenges().await;
            store.fetch_profile().await;
            tokio::task::yield_now().await;
        }
        (state, gw)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_router(Arc::new(AppState::new(EngineConfig::default())));
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["ok"], true);
    }

    #[tokio::test]
    async fn snapshot_requires_session() {
        let app = build_router(Arc::new(AppState::new(EngineConfig::default())));
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/gamification").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_claim_is_a_conflict() {
        let (state, _gw) = logged_in().await;
        let app = build_router(state.clone());

        let first = app.clone().oneshot(post_req("/api/v1/challenges/d1/claim")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await["optimisticXp"], 50);

        let second = app.oneshot(post_req("/api/v1/challenges/d1/claim")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert!(json_body(second).await["error"].as_str().unwrap().contains("already claimed"));
        state.logout().await;
    }

    #[tokio::test]
    async fn unknown_period_is_bad_request() {
        let (state, _gw) = logged_in().await;
        let app = build_router(state.clone());
        let resp = app.oneshot(post_req("/api/v1/leaderboard?period=daily")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        state.logout().await;
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let (state, _gw) = logged_in().await;
        let app = build_router(state.clone());
        let resp = app.clone().oneshot(post_req("/api/v1/session/logout")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/gamification").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
