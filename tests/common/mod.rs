//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use coursequest_gamify::derive::level_for_xp;
use coursequest_gamify::domain::*;
use coursequest_gamify::icons::Icon;
use coursequest_gamify::gateway::{BadgesResponse, LeaderboardResponse, MockGateway};
use coursequest_gamify::store::{GamificationStore, StoreOptions};

pub fn at(sec: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap() + Duration::seconds(sec)
}

pub fn profile(total_xp: i64) -> Profile {
    let info = level_for_xp(total_xp as u64);
    Profile {
        total_xp,
        level: info.level,
        level_title: info.title,
        level_color: info.color,
        xp_for_current_level: info.xp_for_current_level,
        xp_for_next_level: info.xp_for_next_level,
        progress_percent: info.progress_percent,
        streak: Streak { current: 3, longest: 7, today_completed: true, freezes_available: 1 },
        stats: Stats::default(),
        recent_xp_history: vec![XpHistoryEntry {
            timestamp: at(0),
            xp: 10,
            action: XpAction::VideoCompleted,
            description: "Watched a video".into(),
        }],
    }
}

pub fn challenge(id: &str, reward: i64, completed: bool) -> Challenge {
    Challenge {
        id: id.into(),
        title: format!("Challenge {id}"),
        description: String::new(),
        icon: Icon::lookup("target"),
        difficulty: Difficulty::Medium,
        period: ChallengePeriod::Daily,
        target: 3,
        current: if completed { 3 } else { 1 },
        progress: if completed { 100.0 } else { 33.3 },
        xp_reward: reward,
        expires_at: Utc::now() + Duration::hours(12),
        status: if completed { ChallengeStatus::Completed } else { ChallengeStatus::Active },
        completed_at: completed.then(|| at(5)),
        claimed_at: None,
    }
}

pub fn board(challenges: Vec<Challenge>) -> ChallengeBoard {
    ChallengeBoard { daily: challenges, ..Default::default() }
}

pub fn badge(slug: &str, rarity: Rarity, unlocked: bool) -> Badge {
    Badge {
        slug: slug.into(),
        name: slug.replace('-', " "),
        description: String::new(),
        icon: Icon::lookup("award"),
        category: BadgeCategory::Learning,
        rarity,
        unlocked_at: unlocked.then(|| at(0)),
        progress: None,
    }
}

pub fn badges(list: Vec<Badge>) -> BadgesResponse {
    BadgesResponse { summary: coursequest_gamify::derive::summarize_badges(&list), badges: list }
}

pub fn entry(user: &str, xp: i64) -> LeaderboardEntry {
    LeaderboardEntry {
        user_id: user.into(),
        name: user.to_uppercase(),
        xp,
        rank: 0,
        is_current_user: false,
        level: None,
        reached_at: None,
    }
}

pub fn leaderboard(entries: Vec<LeaderboardEntry>, me: Option<&str>) -> LeaderboardResponse {
    let current_user = me.and_then(|id| entries.iter().find(|e| e.user_id == id).cloned());
    LeaderboardResponse { total_participants: entries.len() as u32, entries, current_user }
}

pub fn event(id: &str, kind: EventKind, payload: serde_json::Value, sec: i64) -> GamificationEvent {
    GamificationEvent { id: id.into(), kind, payload, created_at: at(sec), seen_at: None, read_at: None }
}

pub fn xp_event(id: &str, xp: i64, sec: i64) -> GamificationEvent {
    event(id, EventKind::XpGrant, json!({ "xp": xp, "action": "quiz_passed", "description": "Passed a quiz" }), sec)
}

pub fn level_event(id: &str, level: u32, sec: i64) -> GamificationEvent {
    event(id, EventKind::LevelUp, json!({ "newLevel": level, "title": format!("Level {level}") }), sec)
}

pub fn badge_event(id: &str, slug: &str, sec: i64) -> GamificationEvent {
    event(id, EventKind::BadgeUnlock, json!({ "slug": slug, "name": slug, "rarity": "rare" }), sec)
}

pub fn complete_event(id: &str, challenge_id: &str, sec: i64) -> GamificationEvent {
    event(id, EventKind::ChallengeComplete, json!({ "challengeId": challenge_id }), sec)
}

/// Mock with a full data set: 120 XP, one claimable (d1, 50 XP) and one
/// active (d2) challenge, two badges and both leaderboards.
pub fn scripted_gateway() -> Arc<MockGateway> {
    let gw = Arc::new(MockGateway::new());
    gw.set_profile(profile(120));
    gw.set_challenges(board(vec![challenge("d1", 50, true), challenge("d2", 30, false)]));
    gw.set_badges(badges(vec![badge("first-quiz", Rarity::Common, true), badge("night-owl", Rarity::Rare, false)]));
    gw.set_leaderboard(LeaderboardPeriod::Weekly, leaderboard(vec![entry("ana", 300), entry("me", 120)], Some("me")));
    gw.set_leaderboard(LeaderboardPeriod::Monthly, leaderboard(vec![entry("me", 900), entry("bo", 800)], Some("me")));
    gw
}

pub fn store(gw: &Arc<MockGateway>) -> Arc<GamificationStore> {
    Arc::new(GamificationStore::new(gw.clone(), StoreOptions::default()))
}

pub async fn loaded_store(gw: &Arc<MockGateway>) -> Arc<GamificationStore> {
    let s = store(gw);
    for outcome in s.fetch_all().await {
        assert!(outcome.is_applied(), "initial load: {outcome:?}");
    }
    s
}
