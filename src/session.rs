//! Authentication bridge: ties the poller lifecycle to auth transitions.
//!
//! `unauthenticated -> authenticated` starts exactly one poller;
//! `authenticated -> unauthenticated` (logout or teardown) stops it and
//! resets the store.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{info, instrument};

use crate::poller;
use crate::store::GamificationStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
  Unauthenticated,
  Authenticated,
}

pub struct Session {
  store: Arc<GamificationStore>,
  poll_interval: Duration,
  auth: Mutex<AuthState>,
}

impl Session {
  pub fn new(store: Arc<GamificationStore>, poll_interval: Duration) -> Self {
    Self { store, poll_interval, auth: Mutex::new(AuthState::Unauthenticated) }
  }

  pub fn store(&self) -> &Arc<GamificationStore> { &self.store }

  pub fn state(&self) -> AuthState { *self.auth() }

  /// The flag, downgraded if the store's poller was stopped behind our back
  /// (a direct `store.reset()`).
  fn auth(&self) -> MutexGuard<'_, AuthState> {
    let mut auth = self.auth.lock().unwrap_or_else(|p| p.into_inner());
    if *auth == AuthState::Authenticated && !self.store.has_active_poller() {
      *auth = AuthState::Unauthenticated;
    }
    auth
  }

  /// Returns true if this call started polling. Must run inside a Tokio runtime.
  #[instrument(level = "info", skip(self))]
  pub fn authenticate(&self) -> bool {
    let mut auth = self.auth();
    if *auth == AuthState::Authenticated {
      return false;
    }
    *auth = AuthState::Authenticated;
    let handle = poller::start(&self.store, self.poll_interval);
    self.store.attach_poller(handle);
    info!(target: "coursequest_gamify", "Session authenticated; polling started");
    true
  }

  /// Stop polling and clear all gamification state.
  #[instrument(level = "info", skip(self))]
  pub async fn logout(&self) {
    {
      let mut auth = self.auth();
      *auth = AuthState::Unauthenticated;
    }
    self.store.reset().await;
    info!(target: "coursequest_gamify", "Session logged out");
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.store.stop_poller();
  }
}
