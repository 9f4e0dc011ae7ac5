//! CourseQuest gamification engine.
//!
//! Tracks a learner's XP/level/streak profile, badges, challenges and
//! leaderboard against a remote API, polls for server-side gamification
//! events and turns them into popups and celebration modals without
//! duplicates.
//!
//! Entry points:
//!   - `store::GamificationStore`: state container and actions
//!   - `session::Session`: starts/stops polling on auth transitions
//!   - `gateway`: remote API contract (`HttpGateway`, `MockGateway`)
//!   - `routes`: axum surface used by the companion binary

pub mod config;
pub mod derive;
pub mod domain;
pub mod error;
pub mod forum;
pub mod gateway;
pub mod icons;
pub mod notify;
pub mod poller;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;
