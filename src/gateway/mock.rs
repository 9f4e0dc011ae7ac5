//! Scripted in-memory gateway for tests and offline runs.
//!
//! Every operation is counted; delays and failures can be injected per
//! operation key (`"profile"`, `"badges"`, `"leaderboard:weekly"`,
//! `"leaderboard:monthly"`, `"challenges"`, `"claim"`, `"events"`, `"seen"`,
//! `"read"`, `"read_all"`, `"history"`, `"vote"`).

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{ChallengeBoard, GamificationEvent, LeaderboardPeriod, Profile};
use crate::error::{GamifyError, GamifyResult};
use crate::forum::{ForumGateway, VoteTally, VoteValue};

use super::{BadgesResponse, ClaimResponse, GamificationGateway, LeaderboardResponse};

#[derive(Default)]
struct MockData {
  profile: Option<Profile>,
  badges: Option<BadgesResponse>,
  leaderboards: HashMap<LeaderboardPeriod, LeaderboardResponse>,
  challenges: Option<ChallengeBoard>,
  events: Vec<GamificationEvent>,
  history: Vec<GamificationEvent>,
  votes: HashMap<String, VoteTally>,
  /// Extra XP the server grants on claim, on top of the reward.
  claim_bonus_xp: i64,
  seen: Vec<String>,
  read: Vec<String>,
  calls: HashMap<String, usize>,
  delays: HashMap<String, Duration>,
  failures: HashSet<String>,
}

#[derive(Default)]
pub struct MockGateway {
  data: Mutex<MockData>,
}

impl MockGateway {
  pub fn new() -> Self { Self::default() }

  fn data(&self) -> MutexGuard<'_, MockData> {
    // Poisoning only happens if a test already panicked.
    self.data.lock().unwrap_or_else(|p| p.into_inner())
  }

  pub fn set_profile(&self, profile: Profile) { self.data().profile = Some(profile); }
  pub fn set_badges(&self, badges: BadgesResponse) { self.data().badges = Some(badges); }
  pub fn set_challenges(&self, board: ChallengeBoard) { self.data().challenges = Some(board); }
  pub fn set_claim_bonus_xp(&self, xp: i64) { self.data().claim_bonus_xp = xp; }
  pub fn set_vote_tally(&self, post_id: &str, tally: VoteTally) { self.data().votes.insert(post_id.to_string(), tally); }

  pub fn set_leaderboard(&self, period: LeaderboardPeriod, board: LeaderboardResponse) {
    self.data().leaderboards.insert(period, board);
  }

  /// Events returned by every subsequent `get_events` call.
  pub fn set_events(&self, events: Vec<GamificationEvent>) { self.data().events = events; }
  pub fn set_history(&self, events: Vec<GamificationEvent>) { self.data().history = events; }

  pub fn set_delay(&self, op: &str, delay: Duration) { self.data().delays.insert(op.to_string(), delay); }

  /// Make `op` fail with a network error until `clear_failure`.
  pub fn fail(&self, op: &str) { self.data().failures.insert(op.to_string()); }
  pub fn clear_failure(&self, op: &str) { self.data().failures.remove(op); }

  pub fn calls(&self, op: &str) -> usize { self.data().calls.get(op).copied().unwrap_or(0) }
  pub fn seen_ids(&self) -> Vec<String> { self.data().seen.clone() }
  pub fn read_ids(&self) -> Vec<String> { self.data().read.clone() }

  /// Count the call, wait for the injected delay, then apply failure injection.
  async fn enter(&self, op: &str) -> GamifyResult<()> {
    let delay = {
      let mut d = self.data();
      *d.calls.entry(op.to_string()).or_default() += 1;
      d.delays.get(op).copied()
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if self.data().failures.contains(op) {
      return Err(GamifyError::Network(format!("injected failure: {op}")));
    }
    Ok(())
  }
}

fn missing(what: &str) -> GamifyError {
  GamifyError::Http { status: 404, message: format!("{what} not scripted") }
}

#[async_trait]
impl GamificationGateway for MockGateway {
  async fn get_profile(&self) -> GamifyResult<Profile> {
    self.enter("profile").await?;
    self.data().profile.clone().ok_or_else(|| missing("profile"))
  }

  async fn get_badges(&self) -> GamifyResult<BadgesResponse> {
    self.enter("badges").await?;
    self.data().badges.clone().ok_or_else(|| missing("badges"))
  }

  async fn get_leaderboard(&self, period: LeaderboardPeriod, _page: u32, _limit: u32) -> GamifyResult<LeaderboardResponse> {
    self.enter(&format!("leaderboard:{}", period.as_str())).await?;
    self.data().leaderboards.get(&period).cloned().ok_or_else(|| missing("leaderboard"))
  }

  async fn get_challenges(&self) -> GamifyResult<ChallengeBoard> {
    self.enter("challenges").await?;
    self.data().challenges.clone().ok_or_else(|| missing("challenges"))
  }

  async fn claim_challenge(&self, id: &str) -> GamifyResult<ClaimResponse> {
    self.enter("claim").await?;
    let mut d = self.data();
    let bonus = d.claim_bonus_xp;
    let reward = {
      let board = d.challenges.as_mut().ok_or_else(|| missing("challenges"))?;
      let ch = board.find_mut(id).ok_or_else(|| missing("challenge"))?;
      if !ch.is_claimable() {
        return Err(GamifyError::Http { status: 409, message: "Challenge not claimable".into() });
      }
      ch.claimed_at = Some(Utc::now());
      ch.xp_reward
    };
    let awarded = reward + bonus;
    let profile = d.profile.as_mut().ok_or_else(|| missing("profile"))?;
    let before = profile.level;
    profile.total_xp += awarded;
    let info = crate::derive::level_for_xp(profile.total_xp.max(0) as u64);
    profile.level = info.level;
    profile.level_title = info.title;
    profile.level_color = info.color;
    profile.xp_for_current_level = info.xp_for_current_level;
    profile.xp_for_next_level = info.xp_for_next_level;
    profile.progress_percent = info.progress_percent;
    Ok(ClaimResponse { xp_awarded: awarded, new_total_xp: profile.total_xp, leveled_up: profile.level > before })
  }

  async fn get_events(&self) -> GamifyResult<Vec<GamificationEvent>> {
    self.enter("events").await?;
    Ok(self.data().events.clone())
  }

  async fn mark_event_seen(&self, id: &str) -> GamifyResult<()> {
    self.enter("seen").await?;
    let mut d = self.data();
    let now = Utc::now();
    for ev in d.events.iter_mut().filter(|e| e.id == id) {
      ev.seen_at.get_or_insert(now);
    }
    d.seen.push(id.to_string());
    Ok(())
  }

  async fn mark_event_read(&self, id: &str) -> GamifyResult<()> {
    self.enter("read").await?;
    let mut d = self.data();
    let now = Utc::now();
    for ev in d.history.iter_mut().filter(|e| e.id == id) {
      ev.read_at.get_or_insert(now);
    }
    d.read.push(id.to_string());
    Ok(())
  }

  async fn mark_all_events_read(&self) -> GamifyResult<()> {
    self.enter("read_all").await?;
    let mut d = self.data();
    let now = Utc::now();
    for ev in d.history.iter_mut() {
      ev.read_at.get_or_insert(now);
    }
    Ok(())
  }

  async fn get_event_history(&self, limit: u32) -> GamifyResult<Vec<GamificationEvent>> {
    self.enter("history").await?;
    Ok(self.data().history.iter().take(limit as usize).cloned().collect())
  }
}

#[async_trait]
impl ForumGateway for MockGateway {
  async fn vote(&self, post_id: &str, value: VoteValue) -> GamifyResult<VoteTally> {
    self.enter("vote").await?;
    let mut d = self.data();
    let tally = d.votes.entry(post_id.to_string()).or_default();
    Ok(tally.apply(value))
  }
}
