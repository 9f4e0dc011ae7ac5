//! Domain models: profile, badges, challenges, leaderboard and gamification events.
//!
//! Field names follow the remote API (camelCase on the wire).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GamifyError, GamifyResult};
use crate::icons::Icon;

pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
  pub total_xp: i64,
  pub level: u32,
  pub level_title: String,
  /// Colour token for the level badge (e.g. "emerald").
  pub level_color: String,
  pub xp_for_current_level: i64,
  pub xp_for_next_level: i64,
  pub progress_percent: f64,
  #[serde(default)] pub streak: Streak,
  #[serde(default)] pub stats: Stats,
  /// Newest first.
  #[serde(default)] pub recent_xp_history: Vec<XpHistoryEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
  pub current: u32,
  pub longest: u32,
  pub today_completed: bool,
  #[serde(default)] pub freezes_available: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
  #[serde(default)] pub videos_completed: u32,
  #[serde(default)] pub quizzes_passed: u32,
  #[serde(default)] pub total_watch_time_minutes: u32,
  #[serde(default)] pub quiz_average_score: f64,
  #[serde(default)] pub forum_topics: u32,
  #[serde(default)] pub forum_replies: u32,
  #[serde(default)] pub courses_completed: u32,
}

/// What earned the XP.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum XpAction {
  VideoCompleted,
  QuizPassed,
  QuizPerfect,
  ForumTopic,
  ForumReply,
  CourseCompleted,
  ChallengeCompleted,
  StreakBonus,
  BadgeUnlocked,
  DailyLogin,
  #[serde(other)]
  Other,
}
impl Default for XpAction {
  fn default() -> Self { XpAction::Other }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XpHistoryEntry {
  pub timestamp: Timestamp,
  pub xp: i64,
  #[serde(default)] pub action: XpAction,
  #[serde(default)] pub description: String,
}

// ---------------------------------------------------------------------------
// Badges
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
  Common,
  Rare,
  Epic,
  Legendary,
}

impl Rarity {
  pub const ALL: [Rarity; 4] = [Rarity::Common, Rarity::Rare, Rarity::Epic, Rarity::Legendary];

  /// Display weight; higher sorts first.
  pub fn weight(self) -> u8 {
    match self {
      Rarity::Common => 1,
      Rarity::Rare => 2,
      Rarity::Epic => 3,
      Rarity::Legendary => 4,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BadgeCategory {
  Learning,
  Quiz,
  Streak,
  Social,
  Milestone,
  Special,
  #[serde(other)]
  Other,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BadgeProgress {
  pub current: u32,
  pub target: u32,
  pub percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
  pub slug: String,
  pub name: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub icon: Icon,
  pub category: BadgeCategory,
  pub rarity: Rarity,
  #[serde(default)] pub unlocked_at: Option<Timestamp>,
  /// Only meaningful while locked.
  #[serde(default)] pub progress: Option<BadgeProgress>,
}

impl Badge {
  pub fn is_unlocked(&self) -> bool { self.unlocked_at.is_some() }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RarityCount {
  pub unlocked: u32,
  pub total: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BadgesSummary {
  pub unlocked: u32,
  pub total: u32,
  pub by_rarity: BTreeMap<Rarity, RarityCount>,
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePeriod {
  Daily,
  Weekly,
  Special,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
  Active,
  Completed,
  Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  pub id: String,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub icon: Icon,
  pub difficulty: Difficulty,
  pub period: ChallengePeriod,
  pub target: u32,
  pub current: u32,
  #[serde(default)] pub progress: f64,
  pub xp_reward: i64,
  pub expires_at: Timestamp,
  pub status: ChallengeStatus,
  #[serde(default)] pub completed_at: Option<Timestamp>,
  #[serde(default)] pub claimed_at: Option<Timestamp>,
}

impl Challenge {
  pub fn is_claimable(&self) -> bool {
    self.completed_at.is_some() && self.claimed_at.is_none()
  }

  /// Mark as completed at `at`; current is pinned to target.
  pub fn mark_completed(&mut self, at: Timestamp) {
    self.current = self.current.max(self.target);
    self.progress = 100.0;
    self.status = ChallengeStatus::Completed;
    if self.completed_at.is_none() {
      self.completed_at = Some(at);
    }
  }
}

/// Challenge board as grouped by the remote API.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeBoard {
  #[serde(default)] pub daily: Vec<Challenge>,
  #[serde(default)] pub weekly: Vec<Challenge>,
  #[serde(default)] pub special: Vec<Challenge>,
  #[serde(default)] pub completed_today: u32,
  #[serde(default)] pub total_completed: u32,
}

impl ChallengeBoard {
  pub fn iter(&self) -> impl Iterator<Item = &Challenge> {
    self.daily.iter().chain(self.weekly.iter()).chain(self.special.iter())
  }

  pub fn find_mut(&mut self, id: &str) -> Option<&mut Challenge> {
    self.daily
      .iter_mut()
      .chain(self.weekly.iter_mut())
      .chain(self.special.iter_mut())
      .find(|c| c.id == id)
  }

  pub fn find(&self, id: &str) -> Option<&Challenge> {
    self.iter().find(|c| c.id == id)
  }
}

// ---------------------------------------------------------------------------
// Leaderboard
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
  Weekly,
  Monthly,
}

impl LeaderboardPeriod {
  pub fn as_str(self) -> &'static str {
    match self {
      LeaderboardPeriod::Weekly => "weekly",
      LeaderboardPeriod::Monthly => "monthly",
    }
  }
}

impl Default for LeaderboardPeriod {
  fn default() -> Self { LeaderboardPeriod::Weekly }
}

impl std::str::FromStr for LeaderboardPeriod {
  type Err = GamifyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "weekly" => Ok(LeaderboardPeriod::Weekly),
      "monthly" => Ok(LeaderboardPeriod::Monthly),
      other => Err(GamifyError::PreconditionFailed(format!("unknown leaderboard period '{other}'"))),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
  pub user_id: String,
  pub name: String,
  /// XP earned within the period.
  pub xp: i64,
  #[serde(default)] pub rank: u32,
  #[serde(default)] pub is_current_user: bool,
  #[serde(default)] pub level: Option<u32>,
  /// When the user reached this score; used as the tie-breaker.
  #[serde(default)] pub reached_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
  pub period: LeaderboardPeriod,
  pub entries: Vec<LeaderboardEntry>,
  pub total_participants: u32,
  pub current_user: Option<LeaderboardEntry>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  XpGrant,
  LevelUp,
  BadgeUnlock,
  ChallengeComplete,
  /// A kind this client does not know yet; never shown.
  #[serde(other)]
  Unknown,
}

/// Server-emitted notice. `payload` is interpreted according to `kind`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GamificationEvent {
  pub id: String,
  pub kind: EventKind,
  #[serde(default)] pub payload: serde_json::Value,
  pub created_at: Timestamp,
  #[serde(default)] pub seen_at: Option<Timestamp>,
  #[serde(default)] pub read_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XpGrantPayload {
  pub xp: i64,
  #[serde(default)] pub action: XpAction,
  #[serde(default)] pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpData {
  pub new_level: u32,
  #[serde(default)] pub title: String,
  #[serde(default)] pub color: String,
  #[serde(default)] pub total_xp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BadgeUnlockData {
  pub slug: String,
  pub name: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub icon: Icon,
  pub rarity: Rarity,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCompletePayload {
  pub challenge_id: String,
  #[serde(default)] pub title: String,
  #[serde(default)] pub xp_reward: i64,
}

/// Typed view over an event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum EventBody {
  XpGrant(XpGrantPayload),
  LevelUp(LevelUpData),
  BadgeUnlock(BadgeUnlockData),
  ChallengeComplete(ChallengeCompletePayload),
}

impl GamificationEvent {
  pub fn body(&self) -> GamifyResult<EventBody> {
    let p = self.payload.clone();
    Ok(match self.kind {
      EventKind::XpGrant => EventBody::XpGrant(serde_json::from_value(p)?),
      EventKind::LevelUp => EventBody::LevelUp(serde_json::from_value(p)?),
      EventKind::BadgeUnlock => EventBody::BadgeUnlock(serde_json::from_value(p)?),
      EventKind::ChallengeComplete => EventBody::ChallengeComplete(serde_json::from_value(p)?),
      EventKind::Unknown => return Err(GamifyError::Decode(format!("event {} has an unknown kind", self.id))),
    })
  }
}

/// Transient XP notification shown in the popup stack.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XpPopup {
  pub id: String,
  pub xp: i64,
  pub description: String,
  pub created_at: Timestamp,
}
