//! Public protocol structs for the HTTP and WebSocket surfaces (serde ready).
//! Store state itself is serialized via `StoreSnapshot`; these are the small
//! request/response envelopes around it.

use serde::{Deserialize, Serialize};

use crate::domain::{GamificationEvent, LeaderboardPeriod};
use crate::forum::{VoteTally, VoteValue};
use crate::store::{ClaimOutcome, FetchOutcome, StoreSnapshot};

/// Messages the server pushes over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Snapshot { snapshot: Box<StoreSnapshot> },
    LoggedOut,
    Error { message: String },
}

/// Messages the client may send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    DismissPopup { id: String },
    DismissLevelUp,
    DismissBadge,
}

//
// HTTP request/response DTOs
//

#[derive(Deserialize)]
pub struct LoginIn {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

impl PeriodQuery {
    pub fn parse(&self) -> Result<Option<LeaderboardPeriod>, crate::error::GamifyError> {
        self.period.as_deref().map(str::parse).transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct VoteIn {
    pub value: VoteValue,
}

#[derive(Serialize)]
pub struct VoteOut {
    #[serde(flatten)]
    pub tally: VoteTally,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOut {
    pub xp_awarded: i64,
    pub optimistic_xp: i64,
    pub leveled_up: bool,
    pub popup_id: String,
    pub refreshed: bool,
}

impl From<ClaimOutcome> for ClaimOut {
    fn from(c: ClaimOutcome) -> Self {
        Self {
            xp_awarded: c.xp_awarded,
            optimistic_xp: c.optimistic_xp,
            leveled_up: c.leveled_up,
            popup_id: c.popup_id,
            refreshed: c.refresh.is_applied(),
        }
    }
}

/// Per-resource result of a fetch, as reported to HTTP callers.
#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeOut {
    Applied,
    Coalesced,
    Discarded,
    Failed,
}

impl From<&FetchOutcome> for OutcomeOut {
    fn from(o: &FetchOutcome) -> Self {
        match o {
            FetchOutcome::Applied => OutcomeOut::Applied,
            FetchOutcome::Coalesced => OutcomeOut::Coalesced,
            FetchOutcome::Discarded => OutcomeOut::Discarded,
            FetchOutcome::Failed(_) => OutcomeOut::Failed,
        }
    }
}

#[derive(Serialize)]
pub struct RefreshOut {
    pub profile: OutcomeOut,
    pub badges: OutcomeOut,
    pub leaderboard: OutcomeOut,
    pub challenges: OutcomeOut,
}

impl From<&[FetchOutcome; 4]> for RefreshOut {
    fn from([p, b, l, c]: &[FetchOutcome; 4]) -> Self {
        Self { profile: p.into(), badges: b.into(), leaderboard: l.into(), challenges: c.into() }
    }
}

#[derive(Serialize)]
pub struct FetchOut {
    pub outcome: OutcomeOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FetchOutcome> for FetchOut {
    fn from(o: FetchOutcome) -> Self {
        let outcome = OutcomeOut::from(&o);
        let error = match o {
            FetchOutcome::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        Self { outcome, error }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOut {
    pub events: Vec<GamificationEvent>,
    pub unread: usize,
}

#[derive(Serialize)]
pub struct DismissOut {
    pub dismissed: bool,
}

#[derive(Serialize)]
pub struct SessionOut {
    pub authenticated: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
