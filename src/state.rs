//! Application state: engine config plus the active gamification session.
//!
//! This module owns:
//!   - the loaded `EngineConfig`
//!   - at most one active session (store + poller + forum vote book)
//!
//! Logging in replaces any previous session; its poller is stopped first.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{load_config_from_env, EngineConfig};
use crate::error::{GamifyError, GamifyResult};
use crate::forum::{ForumGateway, VoteBook};
use crate::gateway::{GamificationGateway, HttpGateway};
use crate::session::Session;
use crate::store::{GamificationStore, StoreOptions};

pub struct ActiveSession {
    pub session: Arc<Session>,
    pub votes: Arc<VoteBook>,
}

impl ActiveSession {
    pub fn store(&self) -> &Arc<GamificationStore> {
        self.session.store()
    }
}

pub struct AppState {
    pub config: EngineConfig,
    session: RwLock<Option<ActiveSession>>,
}

impl AppState {
    /// Build state from env. If GAMIFY_API_TOKEN is set, a session is started
    /// right away.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> Self {
        let state = Self::new(load_config_from_env());
        info!(target: "coursequest_gamify", base_url = %state.config.api.base_url, poll_secs = state.config.poll.interval_secs, "Engine configured");

        match std::env::var("GAMIFY_API_TOKEN") {
            Ok(token) if !token.trim().is_empty() => {
                if let Err(e) = state.login(token).await {
                    warn!(target: "coursequest_gamify", error = %e, "Auto-login from GAMIFY_API_TOKEN failed");
                }
            }
            _ => info!(target: "coursequest_gamify", "No GAMIFY_API_TOKEN; waiting for a session login"),
        }
        state
    }

    pub fn new(config: EngineConfig) -> Self {
        Self { config, session: RwLock::new(None) }
    }

    /// Start a session against the configured API with a bearer token.
    #[instrument(level = "info", skip_all)]
    pub async fn login(&self, token: String) -> GamifyResult<()> {
        if token.trim().is_empty() {
            return Err(GamifyError::NotAuthenticated);
        }
        let gateway = Arc::new(HttpGateway::new(&self.config.api, Some(token))?);
        self.login_with(gateway).await;
        Ok(())
    }

    /// Start a session over any gateway. Initial data loads in the background.
    pub async fn login_with<G>(&self, gateway: Arc<G>)
    where
        G: GamificationGateway + ForumGateway + 'static,
    {
        let store = Arc::new(GamificationStore::new(gateway.clone(), StoreOptions::from(&self.config)));
        let session = Arc::new(Session::new(store.clone(), self.config.poll.interval()));
        let votes = Arc::new(VoteBook::new(gateway));

        let previous = self.session.write().await.replace(ActiveSession { session: session.clone(), votes });
        if let Some(old) = previous {
            old.session.logout().await;
        }

        session.authenticate();
        tokio::spawn(async move {
            let outcomes = store.fetch_all().await;
            info!(target: "coursequest_gamify", ?outcomes, "Initial gamification load finished");
        });
    }

    /// End the active session. Returns false when nobody was logged in.
    #[instrument(level = "info", skip_all)]
    pub async fn logout(&self) -> bool {
        let taken = self.session.write().await.take();
        match taken {
            Some(active) => {
                active.session.logout().await;
                true
            }
            None => false,
        }
    }

    /// Store of the active session.
    pub async fn store(&self) -> GamifyResult<Arc<GamificationStore>> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|a| a.store().clone())
            .ok_or(GamifyError::NotAuthenticated)
    }

    pub async fn votes(&self) -> GamifyResult<Arc<VoteBook>> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|a| a.votes.clone())
            .ok_or(GamifyError::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[tokio::test]
    async fn store_requires_login() {
        let state = AppState::new(EngineConfig::default());
        assert_matches!(state.store().await, Err(GamifyError::NotAuthenticated));
        assert!(!state.logout().await);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let state = AppState::new(EngineConfig::default());
        assert_matches!(state.login("  ".into()).await, Err(GamifyError::NotAuthenticated));
    }

    #[tokio::test(start_paused = true)]
    async fn relogin_stops_previous_poller() {
        let state = AppState::new(EngineConfig::default());
        let first = Arc::new(MockGateway::new());
        state.login_with(first.clone()).await;
        let old_store = state.store().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = Arc::new(MockGateway::new());
        state.login_with(second.clone()).await;
        assert!(!old_store.has_active_poller());

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(first.calls("events"), 1);
        assert!(second.calls("events") >= 3);
        assert!(state.logout().await);
    }
}
