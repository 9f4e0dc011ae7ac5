//! Pure derivations over raw gamification data.
//!
//! - level/progress from cumulative XP (static threshold table)
//! - badge summaries bucketed by rarity
//! - leaderboard ranking with a deterministic tie-break
//!
//! Nothing here performs I/O or mutates shared state.

use std::cmp::Ordering;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::{Badge, BadgesSummary, Challenge, ChallengeBoard, LeaderboardEntry, Rarity, RarityCount};
use crate::error::{GamifyError, GamifyResult};

/// (level, xp threshold, title, colour token). Thresholds strictly increase.
const BUILTIN_LEVELS: &[(u32, i64, &str, &str)] = &[
    (1, 0, "Newcomer", "slate"),
    (2, 100, "Learner", "gray"),
    (3, 250, "Explorer", "green"),
    (4, 500, "Apprentice", "emerald"),
    (5, 850, "Student", "teal"),
    (6, 1300, "Scholar", "cyan"),
    (7, 1900, "Achiever", "sky"),
    (8, 2600, "Adept", "blue"),
    (9, 3500, "Specialist", "indigo"),
    (10, 4600, "Expert", "violet"),
    (11, 5900, "Mentor", "purple"),
    (12, 7400, "Master", "fuchsia"),
    (13, 9100, "Sage", "pink"),
    (14, 11000, "Virtuoso", "rose"),
    (15, 13200, "Luminary", "red"),
    (16, 15700, "Champion", "orange"),
    (17, 18500, "Hero", "amber"),
    (18, 21600, "Legend", "yellow"),
    (19, 25000, "Mythic", "lime"),
    (20, 30000, "Grandmaster", "gold"),
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LevelDef {
    pub level: u32,
    pub xp_required: i64,
    pub title: String,
    pub color: String,
}

/// Level lookup result.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    pub level: u32,
    pub title: String,
    pub color: String,
    pub xp_for_current_level: i64,
    /// Equal to `xp_for_current_level` at the max level.
    pub xp_for_next_level: i64,
    pub progress_percent: f64,
    pub is_max_level: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LevelTable {
    levels: Vec<LevelDef>,
}

impl LevelTable {
    /// Build a table; thresholds must start at 0 and strictly increase.
    pub fn new(levels: Vec<LevelDef>) -> GamifyResult<Self> {
        let first = levels
            .first()
            .ok_or_else(|| GamifyError::InvalidState("level table is empty".into()))?;
        if first.xp_required != 0 {
            return Err(GamifyError::InvalidState(format!(
                "first level threshold must be 0, got {}",
                first.xp_required
            )));
        }
        if let Some(w) = levels.windows(2).find(|w| w[1].xp_required <= w[0].xp_required) {
            return Err(GamifyError::InvalidState(format!(
                "level thresholds must strictly increase (level {} -> {})",
                w[0].level, w[1].level
            )));
        }
        Ok(Self { levels })
    }

    pub fn builtin() -> &'static LevelTable {
        static TABLE: OnceLock<LevelTable> = OnceLock::new();
        TABLE.get_or_init(|| LevelTable {
            levels: BUILTIN_LEVELS
                .iter()
                .map(|(level, xp, title, color)| LevelDef {
                    level: *level,
                    xp_required: *xp,
                    title: (*title).to_string(),
                    color: (*color).to_string(),
                })
                .collect(),
        })
    }

    pub fn max_level(&self) -> u32 {
        self.levels.last().map(|l| l.level).unwrap_or(1)
    }

    pub fn levels(&self) -> &[LevelDef] {
        &self.levels
    }

    /// Highest level whose threshold is <= `total_xp`.
    pub fn level_for_xp(&self, total_xp: u64) -> LevelInfo {
        let xp = i64::try_from(total_xp).unwrap_or(i64::MAX);
        let idx = self
            .levels
            .iter()
            .rposition(|l| l.xp_required <= xp)
            .unwrap_or(0);
        let current = &self.levels[idx];

        match self.levels.get(idx + 1) {
            Some(next) => {
                let span = (next.xp_required - current.xp_required) as f64;
                let into = (xp - current.xp_required) as f64;
                LevelInfo {
                    level: current.level,
                    title: current.title.clone(),
                    color: current.color.clone(),
                    xp_for_current_level: current.xp_required,
                    xp_for_next_level: next.xp_required,
                    progress_percent: clamp_percent(into / span * 100.0),
                    is_max_level: false,
                }
            }
            None => LevelInfo {
                level: current.level,
                title: current.title.clone(),
                color: current.color.clone(),
                xp_for_current_level: current.xp_required,
                xp_for_next_level: current.xp_required,
                progress_percent: 100.0,
                is_max_level: true,
            },
        }
    }

    /// Rejects negative XP with `InvalidState`.
    pub fn level_for_xp_checked(&self, total_xp: i64) -> GamifyResult<LevelInfo> {
        if total_xp < 0 {
            return Err(GamifyError::InvalidState(format!("negative total XP: {total_xp}")));
        }
        Ok(self.level_for_xp(total_xp as u64))
    }

    /// Panics on negative XP in debug builds; release builds log and fall back
    /// to level 1 at 0 %.
    pub fn level_or_default(&self, total_xp: i64) -> LevelInfo {
        match self.level_for_xp_checked(total_xp) {
            Ok(info) => info,
            Err(e) => {
                debug_assert!(false, "{e}");
                error!(target: "gamification", error = %e, "Derivation input rejected; using level 1");
                let mut info = self.level_for_xp(0);
                info.progress_percent = 0.0;
                info
            }
        }
    }
}

/// `level_for_xp` against the built-in table.
pub fn level_for_xp(total_xp: u64) -> LevelInfo {
    LevelTable::builtin().level_for_xp(total_xp)
}

pub fn clamp_percent(p: f64) -> f64 {
    if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) }
}

/// Recomputed from scratch on every badge list change.
pub fn summarize_badges(badges: &[Badge]) -> BadgesSummary {
    let mut summary = BadgesSummary::default();
    for rarity in Rarity::ALL {
        summary.by_rarity.insert(rarity, RarityCount::default());
    }
    for badge in badges {
        let bucket = summary.by_rarity.entry(badge.rarity).or_default();
        bucket.total += 1;
        summary.total += 1;
        if badge.is_unlocked() {
            bucket.unlocked += 1;
            summary.unlocked += 1;
        }
    }
    summary
}

/// Unlocked first, then rarer first, then by name.
pub fn sort_badges_for_display(badges: &mut [Badge]) {
    badges.sort_by(|a, b| {
        b.is_unlocked()
            .cmp(&a.is_unlocked())
            .then_with(|| b.rarity.weight().cmp(&a.rarity.weight()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Orders by XP desc; ties go to whoever reached the score first (missing
/// timestamps last), then by user id. Ranks are reassigned 1..N.
pub fn rank_leaderboard(mut entries: Vec<LeaderboardEntry>, current_user_id: Option<&str>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| {
        b.xp.cmp(&a.xp)
            .then_with(|| match (a.reached_at, b.reached_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i as u32 + 1;
        entry.is_current_user = current_user_id.map_or(false, |id| id == entry.user_id);
    }
    entries
}

pub fn podium(entries: &[LeaderboardEntry]) -> &[LeaderboardEntry] {
    &entries[..entries.len().min(3)]
}

pub fn claimable(board: &ChallengeBoard) -> Vec<&Challenge> {
    board.iter().filter(|c| c.is_claimable()).collect()
}
