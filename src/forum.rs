//! Forum post voting with optimistic local tallies.
//!
//! A vote is applied locally first and tagged pending; the server tally then
//! replaces it wholesale, or the pre-vote tally is restored on failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::error::{GamifyError, GamifyResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
  Up,
  Down,
  Clear,
}

impl VoteValue {
  pub fn as_i8(self) -> i8 {
    match self {
      VoteValue::Up => 1,
      VoteValue::Down => -1,
      VoteValue::Clear => 0,
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
  pub score: i64,
  /// -1, 0 or 1.
  pub user_vote: i8,
}

impl VoteTally {
  /// Apply a vote in place and return the result. Repeating the current vote clears it.
  pub fn apply(&mut self, value: VoteValue) -> VoteTally {
    let wanted = value.as_i8();
    let next = if wanted != 0 && wanted == self.user_vote { 0 } else { wanted };
    self.score += i64::from(next) - i64::from(self.user_vote);
    self.user_vote = next;
    *self
  }
}

#[async_trait]
pub trait ForumGateway: Send + Sync {
  /// Returns the authoritative tally after the vote.
  async fn vote(&self, post_id: &str, value: VoteValue) -> GamifyResult<VoteTally>;
}

#[derive(Clone, Copy, Debug, Default)]
struct PostVote {
  tally: VoteTally,
  /// Pre-vote tally kept while a vote is in flight.
  rollback: Option<VoteTally>,
}

pub struct VoteBook {
  gateway: Arc<dyn ForumGateway>,
  posts: RwLock<HashMap<String, PostVote>>,
}

impl std::fmt::Debug for VoteBook {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VoteBook").finish_non_exhaustive()
  }
}

impl VoteBook {
  pub fn new(gateway: Arc<dyn ForumGateway>) -> Self {
    Self { gateway, posts: RwLock::new(HashMap::new()) }
  }

  /// Load a tally fetched with the post list. Ignored while a vote is pending.
  pub async fn seed(&self, post_id: &str, tally: VoteTally) {
    let mut posts = self.posts.write().await;
    let entry = posts.entry(post_id.to_string()).or_default();
    if entry.rollback.is_none() {
      entry.tally = tally;
    }
  }

  pub async fn tally(&self, post_id: &str) -> VoteTally {
    self.posts.read().await.get(post_id).map(|p| p.tally).unwrap_or_default()
  }

  pub async fn is_pending(&self, post_id: &str) -> bool {
    self.posts.read().await.get(post_id).map_or(false, |p| p.rollback.is_some())
  }

  #[instrument(level = "info", skip(self))]
  pub async fn vote(&self, post_id: &str, value: VoteValue) -> GamifyResult<VoteTally> {
    {
      let mut posts = self.posts.write().await;
      let entry = posts.entry(post_id.to_string()).or_default();
      if entry.rollback.is_some() {
        return Err(GamifyError::PreconditionFailed(format!("vote already pending on post {post_id}")));
      }
      entry.rollback = Some(entry.tally);
      entry.tally.apply(value);
    }

    let result = self.gateway.vote(post_id, value).await;

    let mut posts = self.posts.write().await;
    let entry = posts.entry(post_id.to_string()).or_default();
    let rollback = entry.rollback.take().unwrap_or(entry.tally);
    match result {
      Ok(server) => {
        entry.tally = server;
        info!(target: "gamification", %post_id, score = server.score, "Vote confirmed");
        Ok(server)
      }
      Err(e) => {
        entry.tally = rollback;
        warn!(target: "gamification", %post_id, error = %e, "Vote failed; rolled back");
        Err(e)
      }
    }
  }
}
