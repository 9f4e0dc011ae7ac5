//! Gamification store: the single owner of all gamification state.
//!
//! This module owns:
//!   - profile, badges, leaderboard and challenges (one `Resource` each)
//!   - the notification reconciler (popup queue + celebration latches)
//!   - the optimistic XP tag left by a claim until the profile is re-fetched
//!   - the handle of the active event poller, if any
//!
//! State is only written inside short critical sections between awaits, so
//! readers always see each field either before or after a completed update.
//! A `reset()` bumps the session epoch; results of requests started under an
//! older epoch are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::derive::{claimable, rank_leaderboard, sort_badges_for_display, summarize_badges, LevelTable};
use crate::domain::{
  Badge, BadgeUnlockData, BadgesSummary, ChallengeBoard, ChallengeStatus, GamificationEvent, Leaderboard,
  LeaderboardPeriod, LevelUpData, Profile, Timestamp, XpAction, XpHistoryEntry, XpPopup,
};
use crate::error::{GamifyError, GamifyResult};
use crate::gateway::GamificationGateway;
use crate::notify::{ReconcileBatch, Reconciler};
use crate::poller::PollerHandle;

pub mod resource;

pub use resource::{FetchOutcome, LoadStatus, Resource};

/// Tunables taken from `EngineConfig`.
#[derive(Clone, Debug)]
pub struct StoreOptions {
  pub leaderboard_page_size: u32,
  pub default_period: LeaderboardPeriod,
  pub xp_history_limit: usize,
  pub popup_ttl: chrono::Duration,
  pub event_history_limit: u32,
  pub level_table: LevelTable,
}

impl Default for StoreOptions {
  fn default() -> Self { StoreOptions::from(&EngineConfig::default()) }
}

impl From<&EngineConfig> for StoreOptions {
  fn from(cfg: &EngineConfig) -> Self {
    Self {
      leaderboard_page_size: cfg.leaderboard.page_size,
      default_period: cfg.leaderboard.default_period,
      xp_history_limit: cfg.display.xp_history_limit,
      popup_ttl: chrono::Duration::seconds(cfg.display.popup_ttl_secs as i64),
      event_history_limit: cfg.display.event_history_limit,
      level_table: cfg.level_table(),
    }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BadgeCollection {
  /// Display order: unlocked, then rarer first.
  pub badges: Vec<Badge>,
  pub summary: BadgesSummary,
}

/// Local XP delta applied before the server confirmed it.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingXp {
  pub delta: i64,
  pub challenge_id: String,
  /// Profile requests issued up to this number predate the delta.
  #[serde(skip)]
  since_seq: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClaimOutcome {
  pub xp_awarded: i64,
  /// XP added locally before reconciliation.
  pub optimistic_xp: i64,
  pub leveled_up: bool,
  pub popup_id: String,
  /// Result of the authoritative profile re-fetch.
  pub refresh: FetchOutcome,
}

struct StoreState {
  epoch: u64,
  profile: Resource<Profile>,
  pending_xp: Option<PendingXp>,
  badges: Resource<BadgeCollection>,
  leaderboard: Resource<Leaderboard>,
  desired_period: LeaderboardPeriod,
  leaderboard_in_flight: HashMap<LeaderboardPeriod, u32>,
  challenges: Resource<ChallengeBoard>,
  claiming: HashSet<String>,
  events_in_flight: bool,
  events_error: Option<String>,
  last_polled_at: Option<Timestamp>,
  /// Event ids whose remote `seen` mark failed; retried on dismissals.
  unconfirmed_seen: HashSet<String>,
  history: Resource<Vec<GamificationEvent>>,
  reconciler: Reconciler,
}

impl StoreState {
  fn new(epoch: u64, period: LeaderboardPeriod) -> Self {
    Self {
      epoch,
      profile: Resource::default(),
      pending_xp: None,
      badges: Resource::default(),
      leaderboard: Resource::default(),
      desired_period: period,
      leaderboard_in_flight: HashMap::new(),
      challenges: Resource::default(),
      claiming: HashSet::new(),
      events_in_flight: false,
      events_error: None,
      last_polled_at: None,
      unconfirmed_seen: HashSet::new(),
      history: Resource::default(),
      reconciler: Reconciler::new(),
    }
  }
}

/// Serializable read view handed to presentation surfaces.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
  pub revision: u64,
  pub profile: Resource<Profile>,
  pub pending_xp: Option<PendingXp>,
  pub recent_xp_history: Vec<XpHistoryEntry>,
  pub badges: Resource<BadgeCollection>,
  pub leaderboard: Resource<Leaderboard>,
  pub leaderboard_period: LeaderboardPeriod,
  pub challenges: Resource<ChallengeBoard>,
  pub claimable_challenges: Vec<String>,
  pub xp_popups: Vec<XpPopup>,
  pub level_up: Option<LevelUpData>,
  pub badge_unlock: Option<BadgeUnlockData>,
  pub events_error: Option<String>,
  pub last_polled_at: Option<Timestamp>,
  pub unread_events: usize,
}

pub struct GamificationStore {
  gateway: Arc<dyn GamificationGateway>,
  opts: StoreOptions,
  state: RwLock<StoreState>,
  poller: Mutex<Option<PollerHandle>>,
  revision: watch::Sender<u64>,
}

impl std::fmt::Debug for GamificationStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GamificationStore").finish_non_exhaustive()
  }
}

impl GamificationStore {
  pub fn new(gateway: Arc<dyn GamificationGateway>, opts: StoreOptions) -> Self {
    let (revision, _) = watch::channel(0);
    let state = StoreState::new(0, opts.default_period);
    Self { gateway, opts, state: RwLock::new(state), poller: Mutex::new(None), revision }
  }

  pub fn options(&self) -> &StoreOptions { &self.opts }

  /// Receiver that changes whenever store state does.
  pub fn subscribe(&self) -> watch::Receiver<u64> { self.revision.subscribe() }

  pub fn revision(&self) -> u64 { *self.revision.borrow() }

  fn bump(&self) {
    self.revision.send_modify(|r| *r += 1);
  }

  // -------------------------------------------------------------------------
  // Resource fetches
  // -------------------------------------------------------------------------

  /// Load the profile. Coalesces with an in-flight load.
  #[instrument(level = "info", skip(self))]
  pub async fn fetch_profile(&self) -> FetchOutcome {
    self.load_profile(false).await
  }

  async fn load_profile(&self, force: bool) -> FetchOutcome {
    let (seq, epoch) = {
      let mut s = self.state.write().await;
      match s.profile.begin(force) {
        Some(seq) => (seq, s.epoch),
        None => return FetchOutcome::Coalesced,
      }
    };
    self.bump();

    let result = self.gateway.get_profile().await.and_then(validate_profile);

    let outcome = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      let fresh = s.profile.finish(seq);
      // Issued before the optimistic delta: it cannot contain it.
      let predates_pending = s.pending_xp.as_ref().map_or(false, |p| seq <= p.since_seq);
      match result {
        Ok(profile) if fresh && !predates_pending => {
          if let Some(p) = s.pending_xp.take() {
            let optimistic = s.profile.data.as_ref().map(|d| d.total_xp);
            debug!(target: "gamification", delta = p.delta, ?optimistic, authoritative = profile.total_xp, "Optimistic XP reconciled");
          }
          s.profile.apply(seq, profile, Utc::now());
          FetchOutcome::Applied
        }
        Ok(_) => FetchOutcome::Discarded,
        Err(e) => {
          warn!(target: "gamification", error = %e, "Profile fetch failed");
          s.profile.fail(seq, &e);
          FetchOutcome::Failed(e)
        }
      }
    };
    self.bump();
    outcome
  }

  #[instrument(level = "info", skip(self))]
  pub async fn fetch_badges(&self) -> FetchOutcome {
    let (seq, epoch) = {
      let mut s = self.state.write().await;
      match s.badges.begin(false) {
        Some(seq) => (seq, s.epoch),
        None => return FetchOutcome::Coalesced,
      }
    };
    self.bump();

    let result = self.gateway.get_badges().await;

    let outcome = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      let fresh = s.badges.finish(seq);
      match result {
        Ok(resp) if fresh => {
          let collection = badge_collection(resp.badges);
          if collection.summary != resp.summary {
            debug!(target: "gamification", "Server badge summary differs from recomputed one; using recomputed");
          }
          s.badges.apply(seq, collection, Utc::now());
          FetchOutcome::Applied
        }
        Ok(_) => FetchOutcome::Discarded,
        Err(e) => {
          warn!(target: "gamification", error = %e, "Badges fetch failed");
          s.badges.fail(seq, &e);
          FetchOutcome::Failed(e)
        }
      }
    };
    self.bump();
    outcome
  }

  /// Load the leaderboard for `period`, which becomes the desired period.
  /// A response for any other period than the desired one at completion time
  /// is discarded.
  #[instrument(level = "info", skip(self), fields(period = period.as_str()))]
  pub async fn fetch_leaderboard(&self, period: LeaderboardPeriod) -> FetchOutcome {
    let (seq, epoch) = {
      let mut s = self.state.write().await;
      s.desired_period = period;
      if s.leaderboard_in_flight.get(&period).copied().unwrap_or(0) > 0 {
        return FetchOutcome::Coalesced;
      }
      let seq = s.leaderboard.begin(true).unwrap_or_default();
      *s.leaderboard_in_flight.entry(period).or_default() += 1;
      (seq, s.epoch)
    };
    self.bump();

    let result = self.gateway.get_leaderboard(period, 1, self.opts.leaderboard_page_size).await;

    let outcome = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      if let Some(n) = s.leaderboard_in_flight.get_mut(&period) {
        *n = n.saturating_sub(1);
      }
      // At most one request per period is in flight, so a response for the
      // desired period is the newest one for it even if another period's
      // response was applied in between.
      s.leaderboard.finish(seq);
      if s.desired_period != period {
        debug!(target: "gamification", period = period.as_str(), desired = s.desired_period.as_str(), "Superseded leaderboard response dropped");
        FetchOutcome::Discarded
      } else {
        match result {
          Ok(resp) => {
            let me = resp.current_user.as_ref().map(|u| u.user_id.clone());
            let entries = rank_leaderboard(resp.entries, me.as_deref());
            let current_user = me.as_deref().and_then(|id| entries.iter().find(|e| e.user_id == id).cloned()).or(resp.current_user);
            let board = Leaderboard { period, entries, total_participants: resp.total_participants, current_user };
            s.leaderboard.apply(seq, board, Utc::now());
            FetchOutcome::Applied
          }
          Err(e) => {
            warn!(target: "gamification", period = period.as_str(), error = %e, "Leaderboard fetch failed");
            s.leaderboard.set_error(&e);
            FetchOutcome::Failed(e)
          }
        }
      }
    };
    self.bump();
    outcome
  }

  #[instrument(level = "info", skip(self))]
  pub async fn fetch_challenges(&self) -> FetchOutcome {
    let (seq, epoch) = {
      let mut s = self.state.write().await;
      match s.challenges.begin(false) {
        Some(seq) => (seq, s.epoch),
        None => return FetchOutcome::Coalesced,
      }
    };
    self.bump();

    let result = self.gateway.get_challenges().await;

    let outcome = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      let fresh = s.challenges.finish(seq);
      match result {
        Ok(mut board) if fresh => {
          if let Some(old) = s.challenges.data.as_ref() {
            keep_local_claims(old, &mut board);
          }
          s.challenges.apply(seq, board, Utc::now());
          FetchOutcome::Applied
        }
        Ok(_) => FetchOutcome::Discarded,
        Err(e) => {
          warn!(target: "gamification", error = %e, "Challenges fetch failed");
          s.challenges.fail(seq, &e);
          FetchOutcome::Failed(e)
        }
      }
    };
    self.bump();
    outcome
  }

  /// Refresh profile, badges, the desired leaderboard and challenges. The
  /// resources load independently; one failure does not block the others.
  pub async fn fetch_all(&self) -> [FetchOutcome; 4] {
    let period = self.state.read().await.desired_period;
    let (p, b, l, c) = tokio::join!(
      self.fetch_profile(),
      self.fetch_badges(),
      self.fetch_leaderboard(period),
      self.fetch_challenges(),
    );
    [p, b, l, c]
  }

  // -------------------------------------------------------------------------
  // Claims
  // -------------------------------------------------------------------------

  /// Claim a completed challenge's reward.
  ///
  /// Fails with `PreconditionFailed` unless the challenge is completed and
  /// unclaimed. On success the reward is added to the profile locally, an XP
  /// popup is raised, and the profile is re-fetched; the server value wins.
  #[instrument(level = "info", skip(self))]
  pub async fn claim_challenge(&self, id: &str) -> GamifyResult<ClaimOutcome> {
    let epoch = {
      let mut s = self.state.write().await;
      let board = s
        .challenges
        .data
        .as_ref()
        .ok_or_else(|| GamifyError::PreconditionFailed("challenges not loaded".into()))?;
      let ch = board
        .find(id)
        .ok_or_else(|| GamifyError::PreconditionFailed(format!("unknown challenge {id}")))?;
      if ch.claimed_at.is_some() {
        return Err(GamifyError::PreconditionFailed(format!("challenge {id} already claimed")));
      }
      if ch.completed_at.is_none() || ch.status != ChallengeStatus::Completed {
        return Err(GamifyError::PreconditionFailed(format!("challenge {id} is not completed")));
      }
      if !s.claiming.insert(id.to_string()) {
        return Err(GamifyError::PreconditionFailed(format!("claim for {id} already in progress")));
      }
      s.epoch
    };

    let result = self.gateway.claim_challenge(id).await;

    let (optimistic_xp, popup_id, resp) = {
      let mut guard = self.state.write().await;
      let s = &mut *guard;
      if s.epoch != epoch {
        return Err(GamifyError::PreconditionFailed("session ended during claim".into()));
      }
      s.claiming.remove(id);
      let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
          warn!(target: "gamification", challenge = %id, error = %e, "Claim failed");
          return Err(e);
        }
      };

      let now = Utc::now();
      let (reward, title) = match s.challenges.data.as_mut().and_then(|b| b.find_mut(id)) {
        Some(ch) => {
          ch.claimed_at = Some(now);
          (ch.xp_reward, ch.title.clone())
        }
        None => (resp.xp_awarded, id.to_string()),
      };

      let description = format!("Challenge: {title}");
      let since_seq = s.profile.issued();
      if let Some(profile) = s.profile.data.as_mut() {
        apply_xp_delta(profile, reward, XpAction::ChallengeCompleted, &description, now, &self.opts.level_table);
        let delta = s.pending_xp.as_ref().map_or(0, |p| p.delta) + reward;
        s.pending_xp = Some(PendingXp { delta, challenge_id: id.to_string(), since_seq });
      }
      let popup_id = s.reconciler.show_xp_popup(reward, description, now);
      info!(target: "gamification", challenge = %id, reward, awarded = resp.xp_awarded, leveled_up = resp.leveled_up, "Challenge claimed");
      (reward, popup_id, resp)
    };
    self.bump();

    let refresh = self.load_profile(true).await;
    Ok(ClaimOutcome {
      xp_awarded: resp.xp_awarded,
      optimistic_xp,
      leveled_up: resp.leveled_up,
      popup_id,
      refresh,
    })
  }

  // -------------------------------------------------------------------------
  // Events and notifications
  // -------------------------------------------------------------------------

  /// Poll new events, classify them and mark the classified ones seen.
  /// Overlapping calls coalesce so at most one events request is in flight.
  #[instrument(level = "debug", skip(self))]
  pub async fn fetch_events(&self) -> FetchOutcome {
    let epoch = {
      let mut s = self.state.write().await;
      if s.events_in_flight {
        return FetchOutcome::Coalesced;
      }
      s.events_in_flight = true;
      s.epoch
    };

    let result = self.gateway.get_events().await;

    let batch = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      s.events_in_flight = false;
      let now = Utc::now();
      s.last_polled_at = Some(now);
      match result {
        Ok(events) => {
          s.events_error = None;
          let batch = s.reconciler.reconcile(events, now);
          let unknown_badge = apply_batch(&mut s, &batch);
          (batch, unknown_badge)
        }
        Err(e) => {
          warn!(target: "gamification", error = %e, "Event poll failed");
          s.events_error = Some(e.to_string());
          drop(s);
          self.bump();
          return FetchOutcome::Failed(e);
        }
      }
    };
    self.bump();

    let (batch, unknown_badge) = batch;
    if batch.classified() > 0 {
      info!(target: "gamification", classified = batch.classified(), "New gamification events");
    }
    for id in &batch.to_mark_seen {
      self.mark_seen(id, epoch).await;
    }
    if batch.affects_profile || !batch.completed_challenges.is_empty() {
      self.fetch_profile().await;
    }
    if unknown_badge {
      self.fetch_badges().await;
    }
    FetchOutcome::Applied
  }

  /// Best-effort: failures are logged and remembered for a later retry.
  async fn mark_seen(&self, id: &str, epoch: u64) {
    match self.gateway.mark_event_seen(id).await {
      Ok(()) => {
        let mut s = self.state.write().await;
        s.unconfirmed_seen.remove(id);
      }
      Err(e) => {
        warn!(target: "gamification", event = %id, error = %e, "Failed to mark event seen");
        let mut s = self.state.write().await;
        if s.epoch == epoch {
          s.unconfirmed_seen.insert(id.to_string());
        }
      }
    }
  }

  async fn retry_unconfirmed_seen(&self) {
    let (ids, epoch) = {
      let s = self.state.read().await;
      (s.unconfirmed_seen.iter().cloned().collect::<Vec<_>>(), s.epoch)
    };
    for id in ids {
      self.mark_seen(&id, epoch).await;
    }
  }

  /// Enqueue an XP popup raised by the UI itself; returns its id.
  pub async fn show_xp_popup(&self, xp: i64, description: &str) -> String {
    let id = self.state.write().await.reconciler.show_xp_popup(xp, description, Utc::now());
    self.bump();
    id
  }

  /// Returns true if the modal became visible immediately.
  pub async fn trigger_level_up(&self, data: LevelUpData) -> bool {
    let visible = self.state.write().await.reconciler.level_up.offer(data);
    self.bump();
    visible
  }

  /// Returns true if the modal became visible immediately.
  pub async fn trigger_badge_unlock(&self, data: BadgeUnlockData) -> bool {
    let visible = self.state.write().await.reconciler.badge_unlock.offer(data);
    self.bump();
    visible
  }

  pub async fn dismiss_xp_popup(&self, id: &str) -> bool {
    let removed = self.state.write().await.reconciler.popups.dismiss(id).is_some();
    if removed {
      self.bump();
      self.retry_unconfirmed_seen().await;
    }
    removed
  }

  /// Close the level-up modal; a queued level-up becomes visible.
  pub async fn dismiss_level_up(&self) -> Option<LevelUpData> {
    let dismissed = self.state.write().await.reconciler.level_up.dismiss();
    self.bump();
    self.retry_unconfirmed_seen().await;
    dismissed
  }

  /// Close the badge modal; a queued unlock becomes visible.
  pub async fn dismiss_badge_unlock(&self) -> Option<BadgeUnlockData> {
    let dismissed = self.state.write().await.reconciler.badge_unlock.dismiss();
    self.bump();
    self.retry_unconfirmed_seen().await;
    dismissed
  }

  /// Drop popups older than the configured TTL.
  pub async fn expire_popups(&self, now: Timestamp) -> usize {
    let n = self.state.write().await.reconciler.popups.expire(now, self.opts.popup_ttl);
    if n > 0 {
      self.bump();
    }
    n
  }

  // -------------------------------------------------------------------------
  // Event history (read state)
  // -------------------------------------------------------------------------

  #[instrument(level = "info", skip(self))]
  pub async fn fetch_event_history(&self, limit: Option<u32>) -> FetchOutcome {
    let limit = limit.unwrap_or(self.opts.event_history_limit);
    let (seq, epoch) = {
      let mut s = self.state.write().await;
      match s.history.begin(false) {
        Some(seq) => (seq, s.epoch),
        None => return FetchOutcome::Coalesced,
      }
    };
    let result = self.gateway.get_event_history(limit).await;
    let outcome = {
      let mut s = self.state.write().await;
      if s.epoch != epoch {
        return FetchOutcome::Discarded;
      }
      let fresh = s.history.finish(seq);
      match result {
        Ok(events) if fresh => {
          s.history.apply(seq, events, Utc::now());
          FetchOutcome::Applied
        }
        Ok(_) => FetchOutcome::Discarded,
        Err(e) => {
          s.history.fail(seq, &e);
          FetchOutcome::Failed(e)
        }
      }
    };
    self.bump();
    outcome
  }

  /// Marks locally, then remotely (best-effort, logged on failure).
  pub async fn mark_event_read(&self, id: &str) {
    {
      let mut s = self.state.write().await;
      let now = Utc::now();
      if let Some(ev) = s.history.data.as_mut().and_then(|h| h.iter_mut().find(|e| e.id == id)) {
        ev.read_at.get_or_insert(now);
      }
    }
    self.bump();
    if let Err(e) = self.gateway.mark_event_read(id).await {
      warn!(target: "gamification", event = %id, error = %e, "Failed to mark event read");
    }
  }

  pub async fn mark_all_events_read(&self) {
    {
      let mut s = self.state.write().await;
      let now = Utc::now();
      for ev in s.history.data.iter_mut().flatten() {
        ev.read_at.get_or_insert(now);
      }
    }
    self.bump();
    if let Err(e) = self.gateway.mark_all_events_read().await {
      warn!(target: "gamification", error = %e, "Failed to mark all events read");
    }
  }

  pub async fn event_history(&self) -> Vec<GamificationEvent> {
    self.state.read().await.history.data.clone().unwrap_or_default()
  }

  pub async fn unread_count(&self) -> usize {
    unread(&self.state.read().await.history)
  }

  // -------------------------------------------------------------------------
  // Reads
  // -------------------------------------------------------------------------

  pub async fn profile(&self) -> Option<Profile> { self.state.read().await.profile.data.clone() }

  pub async fn pending_xp(&self) -> Option<PendingXp> { self.state.read().await.pending_xp.clone() }

  pub async fn leaderboard(&self) -> Option<Leaderboard> { self.state.read().await.leaderboard.data.clone() }

  pub async fn challenges(&self) -> Option<ChallengeBoard> { self.state.read().await.challenges.data.clone() }

  pub async fn badges(&self) -> Option<BadgeCollection> { self.state.read().await.badges.data.clone() }

  pub async fn xp_popups(&self) -> Vec<XpPopup> {
    self.state.read().await.reconciler.popups.iter().cloned().collect()
  }

  pub async fn level_up(&self) -> Option<LevelUpData> {
    self.state.read().await.reconciler.level_up.current().cloned()
  }

  pub async fn badge_unlock(&self) -> Option<BadgeUnlockData> {
    self.state.read().await.reconciler.badge_unlock.current().cloned()
  }

  /// Newest-first XP feed, truncated for display.
  pub async fn recent_xp_history(&self) -> Vec<XpHistoryEntry> {
    let s = self.state.read().await;
    recent_history(&s.profile, self.opts.xp_history_limit)
  }

  pub async fn snapshot(&self) -> StoreSnapshot {
    let s = self.state.read().await;
    StoreSnapshot {
      revision: self.revision(),
      profile: s.profile.clone(),
      pending_xp: s.pending_xp.clone(),
      recent_xp_history: recent_history(&s.profile, self.opts.xp_history_limit),
      badges: s.badges.clone(),
      leaderboard: s.leaderboard.clone(),
      leaderboard_period: s.desired_period,
      challenges: s.challenges.clone(),
      claimable_challenges: s
        .challenges
        .data
        .as_ref()
        .map(|b| claimable(b).into_iter().map(|c| c.id.clone()).collect())
        .unwrap_or_default(),
      xp_popups: s.reconciler.popups.iter().cloned().collect(),
      level_up: s.reconciler.level_up.current().cloned(),
      badge_unlock: s.reconciler.badge_unlock.current().cloned(),
      events_error: s.events_error.clone(),
      last_polled_at: s.last_polled_at,
      unread_events: unread(&s.history),
    }
  }

  // -------------------------------------------------------------------------
  // Session lifecycle
  // -------------------------------------------------------------------------

  /// Install the poller for this session, stopping any previous one.
  pub fn attach_poller(&self, handle: PollerHandle) {
    let previous = self.poller_slot().replace(handle);
    if let Some(old) = previous {
      old.stop();
    }
  }

  pub fn stop_poller(&self) -> bool {
    let handle = self.poller_slot().take();
    match handle {
      Some(h) => {
        h.stop();
        info!(target: "poller", "Event poller stopped");
        true
      }
      None => false,
    }
  }

  pub fn has_active_poller(&self) -> bool {
    self.poller_slot().as_ref().map_or(false, |h| !h.is_finished())
  }

  fn poller_slot(&self) -> std::sync::MutexGuard<'_, Option<PollerHandle>> {
    self.poller.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// Clear all gamification state and stop the poller (logout).
  #[instrument(level = "info", skip(self))]
  pub async fn reset(&self) {
    self.stop_poller();
    {
      let mut s = self.state.write().await;
      let epoch = s.epoch + 1;
      *s = StoreState::new(epoch, self.opts.default_period);
    }
    self.bump();
    info!(target: "gamification", "Gamification state reset");
  }
}

impl Drop for GamificationStore {
  fn drop(&mut self) {
    self.stop_poller();
  }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_profile(mut p: Profile) -> GamifyResult<Profile> {
  if p.total_xp < 0 {
    return Err(GamifyError::InvalidState(format!("profile reports negative XP ({})", p.total_xp)));
  }
  p.progress_percent = crate::derive::clamp_percent(p.progress_percent);
  p.recent_xp_history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
  Ok(p)
}

fn badge_collection(mut badges: Vec<Badge>) -> BadgeCollection {
  let summary = summarize_badges(&badges);
  sort_badges_for_display(&mut badges);
  BadgeCollection { badges, summary }
}

/// Add XP locally and re-derive the level fields from the table.
fn apply_xp_delta(profile: &mut Profile, delta: i64, action: XpAction, description: &str, now: Timestamp, table: &LevelTable) {
  profile.total_xp = profile.total_xp.saturating_add(delta).max(0);
  let info = table.level_or_default(profile.total_xp);
  profile.level = info.level;
  profile.level_title = info.title;
  profile.level_color = info.color;
  profile.xp_for_current_level = info.xp_for_current_level;
  profile.xp_for_next_level = info.xp_for_next_level;
  profile.progress_percent = info.progress_percent;
  profile.recent_xp_history.insert(
    0,
    XpHistoryEntry { timestamp: now, xp: delta, action, description: description.to_string() },
  );
}

/// A claim never reverts: keep local `claimed_at` when a response predates it.
fn keep_local_claims(old: &ChallengeBoard, new: &mut ChallengeBoard) {
  for prev in old.iter().filter(|c| c.claimed_at.is_some()) {
    if let Some(ch) = new.find_mut(&prev.id) {
      if ch.claimed_at.is_none() {
        if let Some(done) = prev.completed_at {
          ch.mark_completed(done);
        }
        ch.claimed_at = prev.claimed_at;
      }
    }
  }
}

/// Apply reconciler side effects to owned resources. Returns true when a
/// badge unlock referenced a badge not in the local list.
fn apply_batch(s: &mut StoreState, batch: &ReconcileBatch) -> bool {
  if let Some(board) = s.challenges.data.as_mut() {
    for (id, at) in &batch.completed_challenges {
      match board.find_mut(id) {
        Some(ch) => {
          let newly = ch.completed_at.is_none();
          ch.mark_completed(*at);
          if newly {
            board.completed_today += 1;
            board.total_completed += 1;
          }
        }
        None => debug!(target: "gamification", challenge = %id, "Completion for unknown challenge"),
      }
    }
  }

  let mut unknown = false;
  if !batch.unlocked_badges.is_empty() {
    match s.badges.data.as_mut() {
      Some(collection) => {
        for (slug, at) in &batch.unlocked_badges {
          match collection.badges.iter_mut().find(|b| &b.slug == slug) {
            Some(b) => {
              b.unlocked_at.get_or_insert(*at);
              b.progress = None;
            }
            None => unknown = true,
          }
        }
        let badges = std::mem::take(&mut collection.badges);
        *collection = badge_collection(badges);
      }
      None => unknown = true,
    }
  }
  unknown
}

fn recent_history(profile: &Resource<Profile>, limit: usize) -> Vec<XpHistoryEntry> {
  profile
    .data
    .as_ref()
    .map(|p| p.recent_xp_history.iter().take(limit).cloned().collect())
    .unwrap_or_default()
}

fn unread(history: &Resource<Vec<GamificationEvent>>) -> usize {
  history.data.as_ref().map_or(0, |h| h.iter().filter(|e| e.read_at.is_none()).count())
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{Challenge, ChallengePeriod, Difficulty};
  use crate::icons::Icon;

  fn challenge(id: &str, claimed: bool) -> Challenge {
    let now = Utc::now();
    Challenge {
      id: id.into(),
      title: id.into(),
      description: String::new(),
      icon: Icon::default(),
      difficulty: Difficulty::Easy,
      period: ChallengePeriod::Weekly,
      target: 2,
      current: 2,
      progress: 100.0,
      xp_reward: 20,
      expires_at: now,
      status: ChallengeStatus::Completed,
      completed_at: Some(now),
      claimed_at: claimed.then_some(now),
    }
  }

  fn profile_at(xp: i64) -> Profile {
    let info = LevelTable::builtin().level_for_xp(xp as u64);
    Profile {
      total_xp: xp,
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

  #[test]
  fn xp_delta_rederives_level_fields() {
    let mut p = profile_at(90);
    apply_xp_delta(&mut p, 20, XpAction::ChallengeCompleted, "Weekly", Utc::now(), LevelTable::builtin());
    assert_eq!((p.total_xp, p.level), (110, 2));
    assert_eq!((p.xp_for_current_level, p.xp_for_next_level), (100, 250));
    assert!((p.progress_percent - 10.0 / 150.0 * 100.0).abs() < 1e-9);
    assert_eq!(p.recent_xp_history.len(), 1);
  }

  #[test]
  fn local_claims_survive_a_stale_board() {
    let old = ChallengeBoard { weekly: vec![challenge("w1", true)], ..Default::default() };
    let mut fresh = ChallengeBoard { weekly: vec![challenge("w1", false), challenge("w2", false)], ..Default::default() };
    keep_local_claims(&old, &mut fresh);
    assert!(fresh.find("w1").and_then(|c| c.claimed_at).is_some());
    assert!(fresh.find("w2").and_then(|c| c.claimed_at).is_none());
  }

  #[test]
  fn profile_validation_orders_history_and_clamps() {
    let mut p = profile_at(10);
    p.progress_percent = 140.0;
    let early = Utc::now() - chrono::Duration::minutes(5);
    let late = Utc::now();
    for ts in [early, late] {
      p.recent_xp_history.push(XpHistoryEntry { timestamp: ts, xp: 1, action: XpAction::Other, description: String::new() });
    }
    let p = validate_profile(p).unwrap();
    assert_eq!(p.progress_percent, 100.0);
    assert_eq!(p.recent_xp_history[0].timestamp, late);
  }
}
