//! Error taxonomy for the gamification engine.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GamifyError {
    /// Request could not be sent or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote API answered with a non-success status.
    #[error("Remote API HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Action is not allowed in the current state (e.g. claiming twice).
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed input to a derivation (e.g. negative XP).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl GamifyError {
    /// True for the failures a resource fetch absorbs into its error flag.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            GamifyError::Network(_) | GamifyError::Http { .. } | GamifyError::Decode(_) | GamifyError::NotAuthenticated
        )
    }
}

impl From<reqwest::Error> for GamifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GamifyError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            GamifyError::Http { status: status.as_u16(), message: e.to_string() }
        } else {
            GamifyError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GamifyError {
    fn from(e: serde_json::Error) -> Self {
        GamifyError::Decode(e.to_string())
    }
}

pub type GamifyResult<T> = Result<T, GamifyError>;
