//! Loading engine configuration (API endpoint, polling, display limits and an
//! optional level table) from TOML.
//!
//! See `EngineConfig` for the expected schema. Every section is optional.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::derive::{LevelDef, LevelTable};
use crate::domain::LeaderboardPeriod;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)] pub api: ApiConfig,
  #[serde(default)] pub poll: PollConfig,
  #[serde(default)] pub leaderboard: LeaderboardConfig,
  #[serde(default)] pub display: DisplayConfig,
  /// Replaces the built-in level table when present and valid.
  #[serde(default)] pub levels: Option<Vec<LevelDef>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self { base_url: "http://localhost:8000/api/v1".into(), timeout_secs: 20 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  pub interval_secs: u64,
}

impl Default for PollConfig {
  fn default() -> Self { Self { interval_secs: 30 } }
}

impl PollConfig {
  pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_secs.max(1)) }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
  pub page_size: u32,
  pub default_period: LeaderboardPeriod,
}

impl Default for LeaderboardConfig {
  fn default() -> Self { Self { page_size: 50, default_period: LeaderboardPeriod::Weekly } }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
  /// Entries shown in the XP history feed.
  pub xp_history_limit: usize,
  /// XP popups auto-expire after this many seconds.
  pub popup_ttl_secs: u64,
  pub event_history_limit: u32,
}

impl Default for DisplayConfig {
  fn default() -> Self {
    Self { xp_history_limit: 10, popup_ttl_secs: 5, event_history_limit: 50 }
  }
}

impl EngineConfig {
  /// Configured level table, or the built-in one when absent or invalid.
  pub fn level_table(&self) -> LevelTable {
    match &self.levels {
      Some(levels) => match LevelTable::new(levels.clone()) {
        Ok(t) => t,
        Err(e) => {
          error!(target: "coursequest_gamify", error = %e, "Invalid [[levels]] table; using built-in levels");
          LevelTable::builtin().clone()
        }
      },
      None => LevelTable::builtin().clone(),
    }
  }

  pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<EngineConfig>(s)
  }
}

/// Load `EngineConfig` from GAMIFY_CONFIG_PATH (defaults on any IO/parse
/// error), then apply GAMIFY_API_BASE_URL.
pub fn load_config_from_env() -> EngineConfig {
  let mut cfg = match std::env::var("GAMIFY_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match EngineConfig::from_toml_str(&s) {
        Ok(cfg) => {
          info!(target: "coursequest_gamify", %path, "Loaded engine config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "coursequest_gamify", %path, error = %e, "Failed to parse TOML config");
          EngineConfig::default()
        }
      },
      Err(e) => {
        error!(target: "coursequest_gamify", %path, error = %e, "Failed to read TOML config file");
        EngineConfig::default()
      }
    },
    Err(_) => {
      warn!(target: "coursequest_gamify", "GAMIFY_CONFIG_PATH not set; using defaults");
      EngineConfig::default()
    }
  };

  if let Ok(url) = std::env::var("GAMIFY_API_BASE_URL") {
    cfg.api.base_url = url;
  }
  cfg
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_yields_defaults() {
    let cfg = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(cfg.poll.interval(), Duration::from_secs(30));
    assert_eq!(cfg.leaderboard.page_size, 50);
    assert_eq!(cfg.display.xp_history_limit, 10);
    assert_eq!(cfg.level_table().max_level(), 20);
  }

  #[test]
  fn sections_override_defaults() {
    let cfg = EngineConfig::from_toml_str(
      r#"
      [api]
      base_url = "https://courses.example/api"
      timeout_secs = 5

      [poll]
      interval_secs = 10

      [leaderboard]
      page_size = 20
      default_period = "monthly"

      [[levels]]
      level = 1
      xp_required = 0
      title = "Rookie"
      color = "gray"

      [[levels]]
      level = 2
      xp_required = 10
      title = "Pro"
      color = "gold"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.api.timeout_secs, 5);
    assert_eq!(cfg.poll.interval(), Duration::from_secs(10));
    assert_eq!(cfg.leaderboard.default_period, LeaderboardPeriod::Monthly);
    let table = cfg.level_table();
    assert_eq!(table.max_level(), 2);
    assert_eq!(table.level_for_xp(12).title, "Pro");
  }

  #[test]
  fn partial_sections_keep_remaining_defaults() {
    let cfg = EngineConfig::from_toml_str(
      r#"
      [api]
      base_url = "https://courses.example/api"

      [display]
      popup_ttl_secs = 8
      "#,
    )
    .unwrap();
    assert_eq!(cfg.api.base_url, "https://courses.example/api");
    assert_eq!(cfg.api.timeout_secs, 20);
    assert_eq!(cfg.display.popup_ttl_secs, 8);
    assert_eq!(cfg.display.xp_history_limit, 10);
    assert_eq!(cfg.display.event_history_limit, 50);
  }

  #[test]
  fn invalid_level_table_falls_back_to_builtin() {
    let cfg = EngineConfig::from_toml_str(
      r#"
      [[levels]]
      level = 1
      xp_required = 5
      title = "Broken"
      color = "red"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.level_table(), *LevelTable::builtin());
  }
}
