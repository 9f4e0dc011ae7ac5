//! Poller lifecycle across auth transitions, driven through `AppState`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use common::*;
use coursequest_gamify::config::EngineConfig;
use coursequest_gamify::error::GamifyError;
use coursequest_gamify::forum::{VoteTally, VoteValue};
use coursequest_gamify::session::{AuthState, Session};
use coursequest_gamify::state::AppState;

#[tokio::test(start_paused = true)]
async fn polled_events_reach_the_store() {
    let gw = scripted_gateway();
    let state = AppState::new(EngineConfig::default());
    state.login_with(gw.clone()).await;
    let store = state.store().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.xp_popups().await.is_empty());

    gw.set_events(vec![xp_event("e1", 25, 1)]);
    tokio::time::sleep(Duration::from_secs(30)).await;
    let popups = store.xp_popups().await;
    assert_eq!(popups.len(), 1);
    assert_eq!(popups[0].xp, 25);
    assert_eq!(gw.seen_ids(), ["e1"]);
    state.logout().await;
}

#[tokio::test(start_paused = true)]
async fn no_polls_after_logout_until_next_login() {
    let gw = scripted_gateway();
    let store = store(&gw);
    let session = Session::new(store.clone(), Duration::from_secs(30));

    session.authenticate();
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(gw.calls("events"), 3);

    session.logout().await;
    assert_eq!(session.state(), AuthState::Unauthenticated);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(gw.calls("events"), 3);

    session.authenticate();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(gw.calls("events"), 4);
}

#[tokio::test(start_paused = true)]
async fn logout_mid_poll_drops_the_result() {
    let gw = scripted_gateway();
    gw.set_delay("events", Duration::from_secs(10));
    gw.set_events(vec![xp_event("e1", 25, 1)]);
    let store = store(&gw);
    let session = Session::new(store.clone(), Duration::from_secs(30));

    session.authenticate();
    tokio::time::sleep(Duration::from_secs(2)).await;
    session.logout().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(store.xp_popups().await.is_empty());
    assert!(gw.seen_ids().is_empty());
    assert_eq!(gw.calls("events"), 1);
}

#[tokio::test]
async fn votes_roll_back_on_failure() {
    let gw = scripted_gateway();
    gw.set_vote_tally("p1", VoteTally { score: 4, user_vote: 0 });
    let state = AppState::new(EngineConfig::default());
    state.login_with(gw.clone()).await;
    let votes = state.votes().await.unwrap();
    votes.seed("p1", VoteTally { score: 4, user_vote: 0 }).await;

    let tally = votes.vote("p1", VoteValue::Up).await.unwrap();
    assert_eq!(tally, VoteTally { score: 5, user_vote: 1 });

    gw.fail("vote");
    assert_matches!(votes.vote("p1", VoteValue::Down).await, Err(GamifyError::Network(_)));
    assert_eq!(votes.tally("p1").await, VoteTally { score: 5, user_vote: 1 });
    assert!(!votes.is_pending("p1").await);
    state.logout().await;
}

#[tokio::test]
async fn logged_out_state_rejects_store_access() {
    let state = Arc::new(AppState::new(EngineConfig::default()));
    assert_matches!(state.store().await, Err(GamifyError::NotAuthenticated));
    assert_matches!(state.votes().await, Err(GamifyError::NotAuthenticated));
}
