//! Contract with the remote gamification API.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │   GamificationGateway    │
//!            │  (profile, badges, ...)  │
//!            └────────────┬─────────────┘
//!              ┌──────────┴──────────┐
//!              ▼                     ▼
//!      ┌──────────────┐      ┌──────────────┐
//!      │ HttpGateway  │      │ MockGateway  │
//!      │  (reqwest)   │      │ (scripted)   │
//!      └──────────────┘      └──────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
  Badge, BadgesSummary, ChallengeBoard, GamificationEvent, LeaderboardEntry, LeaderboardPeriod, Profile,
};
use crate::error::GamifyResult;

pub mod http;
pub mod mock;

pub use http::HttpGateway;
pub use mock::MockGateway;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BadgesResponse {
  pub badges: Vec<Badge>,
  pub summary: BadgesSummary,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
  pub entries: Vec<LeaderboardEntry>,
  pub total_participants: u32,
  #[serde(default)] pub current_user: Option<LeaderboardEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
  pub xp_awarded: i64,
  pub new_total_xp: i64,
  pub leveled_up: bool,
}

/// Remote operations consumed by the store. Implementations apply their own
/// transport timeout; a timeout surfaces as `GamifyError::Network`.
#[async_trait]
pub trait GamificationGateway: Send + Sync {
  async fn get_profile(&self) -> GamifyResult<Profile>;

  async fn get_badges(&self) -> GamifyResult<BadgesResponse>;

  async fn get_leaderboard(&self, period: LeaderboardPeriod, page: u32, limit: u32) -> GamifyResult<LeaderboardResponse>;

  async fn get_challenges(&self) -> GamifyResult<ChallengeBoard>;

  async fn claim_challenge(&self, id: &str) -> GamifyResult<ClaimResponse>;

  /// Recent events. May repeat events already marked seen.
  async fn get_events(&self) -> GamifyResult<Vec<GamificationEvent>>;

  /// Idempotent.
  async fn mark_event_seen(&self, id: &str) -> GamifyResult<()>;

  async fn mark_event_read(&self, id: &str) -> GamifyResult<()>;

  async fn mark_all_events_read(&self) -> GamifyResult<()>;

  async fn get_event_history(&self, limit: u32) -> GamifyResult<Vec<GamificationEvent>>;
}
