//! Notification reconciler: decides what each incoming event shows.
//!
//! - `xp_grant` events go to a FIFO popup queue (many visible, stacked)
//! - `level_up` and `badge_unlock` go to independent single-slot latches
//! - `challenge_complete` only updates counters
//!
//! An event id is classified at most once per session, no matter how many
//! polls return it.

use std::collections::{HashSet, VecDeque};

use chrono::Duration;
use tracing::{debug, warn};

use crate::domain::{BadgeUnlockData, EventBody, GamificationEvent, LevelUpData, Timestamp, XpPopup};
use crate::util::local_id;

/// One visible value plus at most one queued successor.
///
/// Offering while something is visible replaces the queued successor; the
/// successor becomes visible only when the current value is dismissed.
#[derive(Clone, Debug)]
pub struct Latch<T> {
  current: Option<T>,
  next: Option<T>,
}

impl<T> Default for Latch<T> {
  fn default() -> Self { Self { current: None, next: None } }
}

impl<T> Latch<T> {
  /// Returns true when `value` became visible immediately.
  pub fn offer(&mut self, value: T) -> bool {
    if self.current.is_none() {
      self.current = Some(value);
      true
    } else {
      self.next = Some(value);
      false
    }
  }

  pub fn current(&self) -> Option<&T> { self.current.as_ref() }

  pub fn has_queued(&self) -> bool { self.next.is_some() }

  /// Remove the visible value and promote the queued one.
  pub fn dismiss(&mut self) -> Option<T> {
    let dismissed = self.current.take();
    self.current = self.next.take();
    dismissed
  }

  pub fn clear(&mut self) {
    self.current = None;
    self.next = None;
  }
}

#[derive(Clone, Debug, Default)]
pub struct PopupQueue {
  items: VecDeque<XpPopup>,
}

impl PopupQueue {
  pub fn push(&mut self, popup: XpPopup) { self.items.push_back(popup); }

  pub fn dismiss(&mut self, id: &str) -> Option<XpPopup> {
    let idx = self.items.iter().position(|p| p.id == id)?;
    self.items.remove(idx)
  }

  /// Drop popups older than `ttl`; returns how many were removed.
  pub fn expire(&mut self, now: Timestamp, ttl: Duration) -> usize {
    let before = self.items.len();
    self.items.retain(|p| now - p.created_at < ttl);
    before - self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &XpPopup> { self.items.iter() }
  pub fn len(&self) -> usize { self.items.len() }
  pub fn is_empty(&self) -> bool { self.items.is_empty() }
  pub fn clear(&mut self) { self.items.clear(); }
}

/// What happened to one event.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
  XpPopup,
  LevelUp { visible: bool },
  BadgeUnlock { visible: bool },
  ChallengeComplete,
  /// Already processed in this session.
  Duplicate,
  /// Server reports it as seen; nothing to show.
  AlreadySeen,
  /// Payload did not match its kind; marked seen so it stops coming back.
  Malformed,
}

/// Side effects the store applies after a batch.
#[derive(Clone, Debug, Default)]
pub struct ReconcileBatch {
  pub outcomes: Vec<(String, Classification)>,
  /// Ids to mark seen remotely (best-effort).
  pub to_mark_seen: Vec<String>,
  pub completed_challenges: Vec<(String, Timestamp)>,
  pub unlocked_badges: Vec<(String, Timestamp)>,
  /// Any XP-affecting event was classified; the profile should be refreshed.
  pub affects_profile: bool,
}

impl ReconcileBatch {
  pub fn classified(&self) -> usize { self.to_mark_seen.len() }
}

#[derive(Debug, Default)]
pub struct Reconciler {
  processed: HashSet<String>,
  pub popups: PopupQueue,
  pub level_up: Latch<LevelUpData>,
  pub badge_unlock: Latch<BadgeUnlockData>,
}

impl Reconciler {
  pub fn new() -> Self { Self::default() }

  pub fn is_processed(&self, id: &str) -> bool { self.processed.contains(id) }

  /// Classify a poll batch. Events are handled oldest first so popups stack
  /// in the order they were earned.
  pub fn reconcile(&mut self, mut events: Vec<GamificationEvent>, now: Timestamp) -> ReconcileBatch {
    events.sort_by_key(|e| e.created_at);
    let mut batch = ReconcileBatch::default();

    for ev in events {
      if !self.processed.insert(ev.id.clone()) {
        batch.outcomes.push((ev.id, Classification::Duplicate));
        continue;
      }
      if ev.seen_at.is_some() {
        batch.outcomes.push((ev.id, Classification::AlreadySeen));
        continue;
      }

      let class = match ev.body() {
        Ok(EventBody::XpGrant(p)) => {
          self.popups.push(XpPopup { id: ev.id.clone(), xp: p.xp, description: p.description, created_at: now });
          batch.affects_profile = true;
          Classification::XpPopup
        }
        Ok(EventBody::LevelUp(data)) => {
          batch.affects_profile = true;
          Classification::LevelUp { visible: self.level_up.offer(data) }
        }
        Ok(EventBody::BadgeUnlock(data)) => {
          batch.unlocked_badges.push((data.slug.clone(), ev.created_at));
          Classification::BadgeUnlock { visible: self.badge_unlock.offer(data) }
        }
        Ok(EventBody::ChallengeComplete(p)) => {
          batch.completed_challenges.push((p.challenge_id, ev.created_at));
          Classification::ChallengeComplete
        }
        Err(e) => {
          warn!(target: "reconciler", id = %ev.id, kind = ?ev.kind, error = %e, "Malformed event payload");
          Classification::Malformed
        }
      };
      debug!(target: "reconciler", id = %ev.id, ?class, "Event classified");
      batch.to_mark_seen.push(ev.id.clone());
      batch.outcomes.push((ev.id, class));
    }
    batch
  }

  /// Enqueue a popup not backed by a server event; returns its id.
  pub fn show_xp_popup(&mut self, xp: i64, description: impl Into<String>, now: Timestamp) -> String {
    let id = local_id("xp");
    self.popups.push(XpPopup { id: id.clone(), xp, description: description.into(), created_at: now });
    id
  }

  pub fn reset(&mut self) {
    self.processed.clear();
    self.popups.clear();
    self.level_up.clear();
    self.badge_unlock.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::EventKind;
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  fn at(sec: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, sec).unwrap()
  }

  fn ev(id: &str, kind: EventKind, payload: serde_json::Value, sec: u32) -> GamificationEvent {
    GamificationEvent { id: id.into(), kind, payload, created_at: at(sec), seen_at: None, read_at: None }
  }

  fn xp(id: &str, amount: i64, sec: u32) -> GamificationEvent {
    ev(id, EventKind::XpGrant, json!({ "xp": amount, "description": format!("+{amount}") }), sec)
  }

  fn level(id: &str, lvl: u32, sec: u32) -> GamificationEvent {
    ev(id, EventKind::LevelUp, json!({ "newLevel": lvl, "title": format!("L{lvl}") }), sec)
  }

  #[test]
  fn latch_serializes_and_replaces_queued() {
    let mut l = Latch::default();
    assert!(l.offer(1));
    assert!(!l.offer(2));
    assert!(!l.offer(3));
    assert_eq!(l.current(), Some(&1));
    assert_eq!(l.dismiss(), Some(1));
    assert_eq!(l.current(), Some(&3));
    assert!(!l.has_queued());
    assert_eq!(l.dismiss(), Some(3));
    assert_eq!(l.current(), None);
  }

  #[test]
  fn same_event_twice_enqueues_once() {
    let mut r = Reconciler::new();
    let first = r.reconcile(vec![xp("e1", 10, 0)], at(0));
    let second = r.reconcile(vec![xp("e1", 10, 0)], at(30));
    assert_eq!(first.to_mark_seen, ["e1"]);
    assert!(second.to_mark_seen.is_empty());
    assert_eq!(second.outcomes, [("e1".to_string(), Classification::Duplicate)]);
    assert_eq!(r.popups.len(), 1);
  }

  #[test]
  fn duplicate_within_one_batch_is_ignored() {
    let mut r = Reconciler::new();
    let batch = r.reconcile(vec![level("l1", 3, 0), level("l1", 3, 0)], at(0));
    assert_eq!(batch.classified(), 1);
    assert_eq!(r.level_up.current().map(|d| d.new_level), Some(3));
    assert!(!r.level_up.has_queued());
  }

  #[test]
  fn seen_events_are_not_shown() {
    let mut r = Reconciler::new();
    let mut e = xp("e1", 5, 0);
    e.seen_at = Some(at(1));
    let batch = r.reconcile(vec![e], at(2));
    assert!(r.popups.is_empty());
    assert!(batch.to_mark_seen.is_empty());
    assert_eq!(batch.outcomes[0].1, Classification::AlreadySeen);
  }

  #[test]
  fn popups_stack_in_creation_order() {
    let mut r = Reconciler::new();
    r.reconcile(vec![xp("late", 20, 9), xp("early", 10, 1)], at(10));
    let ids: Vec<_> = r.popups.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["early", "late"]);
  }

  #[test]
  fn two_level_ups_show_one_at_a_time() {
    let mut r = Reconciler::new();
    let batch = r.reconcile(vec![level("l2", 2, 0), level("l3", 3, 5)], at(6));
    assert_eq!(batch.outcomes[0].1, Classification::LevelUp { visible: true });
    assert_eq!(batch.outcomes[1].1, Classification::LevelUp { visible: false });
    assert_eq!(r.level_up.current().map(|d| d.new_level), Some(2));
    r.level_up.dismiss();
    assert_eq!(r.level_up.current().map(|d| d.new_level), Some(3));
  }

  #[test]
  fn level_up_and_badge_slots_are_independent() {
    let mut r = Reconciler::new();
    let badge = ev(
      "b1",
      EventKind::BadgeUnlock,
      json!({ "slug": "first-quiz", "name": "First Quiz", "rarity": "common" }),
      1,
    );
    let batch = r.reconcile(vec![level("l2", 2, 0), badge], at(2));
    assert!(r.level_up.current().is_some());
    assert_eq!(r.badge_unlock.current().map(|b| b.slug.as_str()), Some("first-quiz"));
    assert_eq!(batch.unlocked_badges, [("first-quiz".to_string(), at(1))]);
  }

  #[test]
  fn challenge_completion_only_updates_counters() {
    let mut r = Reconciler::new();
    let batch = r.reconcile(
      vec![ev("c1", EventKind::ChallengeComplete, json!({ "challengeId": "daily-1" }), 0)],
      at(0),
    );
    assert_eq!(batch.completed_challenges, [("daily-1".to_string(), at(0))]);
    assert!(r.popups.is_empty() && r.level_up.current().is_none() && r.badge_unlock.current().is_none());
    assert!(!batch.affects_profile);
  }

  #[test]
  fn malformed_payload_is_marked_seen_but_not_shown() {
    let mut r = Reconciler::new();
    let batch = r.reconcile(vec![ev("bad", EventKind::XpGrant, json!({}), 0)], at(0));
    assert_eq!(batch.outcomes[0].1, Classification::Malformed);
    assert_eq!(batch.to_mark_seen, ["bad"]);
    assert!(r.popups.is_empty());
  }

  #[test]
  fn unknown_kind_is_marked_seen_but_not_shown() {
    let mut r = Reconciler::new();
    let batch = r.reconcile(vec![ev("new", EventKind::Unknown, json!({ "days": 2 }), 0), xp("a", 5, 1)], at(1));
    assert_eq!(batch.outcomes[0].1, Classification::Malformed);
    assert_eq!(batch.to_mark_seen, ["new", "a"]);
    assert_eq!(r.popups.len(), 1);
  }

  #[test]
  fn popups_expire_and_dismiss_independently() {
    let mut r = Reconciler::new();
    r.reconcile(vec![xp("a", 1, 0)], at(0));
    let local = r.show_xp_popup(50, "Challenge reward", at(4));
    assert_eq!(r.popups.len(), 2);
    assert_eq!(r.popups.expire(at(5), Duration::seconds(5)), 1);
    assert_eq!(r.popups.iter().next().map(|p| p.id.clone()), Some(local.clone()));
    assert!(r.popups.dismiss(&local).is_some());
    assert!(r.popups.dismiss(&local).is_none());
  }

  #[test]
  fn reset_forgets_processed_ids() {
    let mut r = Reconciler::new();
    r.reconcile(vec![xp("e1", 1, 0)], at(0));
    r.reset();
    assert!(!r.is_processed("e1"));
    assert!(r.popups.is_empty());
  }
}
