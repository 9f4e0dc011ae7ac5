//! Icon names sent by the remote API, mapped to a closed set.
//!
//! Unknown names resolve to [`Icon::Sparkles`], so a new server-side icon never
//! breaks deserialization or rendering.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Icon {
  Award,
  BookOpen,
  CheckCircle,
  Clock,
  Crown,
  Flame,
  GraduationCap,
  Heart,
  Medal,
  MessageCircle,
  Sparkles,
  Star,
  Target,
  Trophy,
  Video,
  Zap,
}

/// Name -> icon lookup table. Aliases share an entry.
const ICON_TABLE: &[(&str, Icon)] = &[
  ("award", Icon::Award),
  ("book", Icon::BookOpen),
  ("book-open", Icon::BookOpen),
  ("check", Icon::CheckCircle),
  ("check-circle", Icon::CheckCircle),
  ("clock", Icon::Clock),
  ("crown", Icon::Crown),
  ("fire", Icon::Flame),
  ("flame", Icon::Flame),
  ("graduation-cap", Icon::GraduationCap),
  ("heart", Icon::Heart),
  ("medal", Icon::Medal),
  ("message", Icon::MessageCircle),
  ("message-circle", Icon::MessageCircle),
  ("sparkles", Icon::Sparkles),
  ("star", Icon::Star),
  ("target", Icon::Target),
  ("trophy", Icon::Trophy),
  ("video", Icon::Video),
  ("zap", Icon::Zap),
];

pub const FALLBACK_ICON: Icon = Icon::Sparkles;

impl Icon {
  /// Resolve an icon name. Case and `_`/` ` vs `-` differences are ignored.
  pub fn lookup(name: &str) -> Icon {
    let key = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    ICON_TABLE
      .iter()
      .find(|(n, _)| *n == key)
      .map(|(_, icon)| *icon)
      .unwrap_or(FALLBACK_ICON)
  }

  /// Canonical name used when serializing back to the UI.
  pub fn as_str(self) -> &'static str {
    match self {
      Icon::Award => "award",
      Icon::BookOpen => "book-open",
      Icon::CheckCircle => "check-circle",
      Icon::Clock => "clock",
      Icon::Crown => "crown",
      Icon::Flame => "flame",
      Icon::GraduationCap => "graduation-cap",
      Icon::Heart => "heart",
      Icon::Medal => "medal",
      Icon::MessageCircle => "message-circle",
      Icon::Sparkles => "sparkles",
      Icon::Star => "star",
      Icon::Target => "target",
      Icon::Trophy => "trophy",
      Icon::Video => "video",
      Icon::Zap => "zap",
    }
  }
}

impl Default for Icon {
  fn default() -> Self { FALLBACK_ICON }
}

impl From<String> for Icon {
  fn from(s: String) -> Self { Icon::lookup(&s) }
}

impl From<Icon> for String {
  fn from(icon: Icon) -> Self { icon.as_str().to_string() }
}
