//! Per-resource async load state: `idle -> loading -> {ready, error}`.
//!
//! Requests are numbered. A response is applied only if it is newer than the
//! last applied one, so a slow early request never overwrites a later result.

use serde::Serialize;

use crate::domain::Timestamp;
use crate::error::GamifyError;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Result of a `fetch_*` action. Fetch errors are captured here and in the
/// resource's error flag, never propagated.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Applied,
    /// A request for the same thing was already in flight.
    Coalesced,
    /// The response was superseded (newer request, parameter change or reset).
    Discarded,
    Failed(GamifyError),
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, FetchOutcome::Applied)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T> {
    pub data: Option<T>,
    pub status: LoadStatus,
    pub error: Option<String>,
    pub updated_at: Option<Timestamp>,
    #[serde(skip)]
    issued: u64,
    #[serde(skip)]
    applied: u64,
    #[serde(skip)]
    in_flight: u32,
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Self {
            data: None,
            status: LoadStatus::Idle,
            error: None,
            updated_at: None,
            issued: 0,
            applied: 0,
            in_flight: 0,
        }
    }
}

impl<T> Resource<T> {
    /// Start a request. Without `force`, returns `None` while another request
    /// is in flight (coalesced).
    pub fn begin(&mut self, force: bool) -> Option<u64> {
        if self.in_flight > 0 && !force {
            return None;
        }
        self.issued += 1;
        self.in_flight += 1;
        self.status = LoadStatus::Loading;
        Some(self.issued)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight > 0
    }

    /// Sequence number of the most recently issued request.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Mark request `seq` finished. Returns true if its response may be applied.
    pub fn finish(&mut self, seq: u64) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        let fresh = seq > self.applied;
        if self.in_flight == 0 && self.status == LoadStatus::Loading {
            self.status = if self.error.is_some() {
                LoadStatus::Error
            } else if self.data.is_some() {
                LoadStatus::Ready
            } else {
                LoadStatus::Idle
            };
        }
        fresh
    }

    /// Replace the data wholesale. Call after `finish` returned true.
    pub fn apply(&mut self, seq: u64, data: T, now: Timestamp) {
        self.applied = self.applied.max(seq);
        self.data = Some(data);
        self.error = None;
        self.updated_at = Some(now);
        self.status = self.settled(LoadStatus::Ready);
    }

    /// Record a failure; prior data stays for display.
    pub fn fail(&mut self, seq: u64, err: &GamifyError) {
        if seq <= self.applied {
            return;
        }
        self.set_error(err);
    }

    /// Record a failure without the sequence check, for callers that decide
    /// freshness themselves.
    pub fn set_error(&mut self, err: &GamifyError) {
        self.error = Some(err.to_string());
        self.status = self.settled(LoadStatus::Error);
    }

    fn settled(&self, status: LoadStatus) -> LoadStatus {
        if self.in_flight > 0 {
            LoadStatus::Loading
        } else {
            status
        }
    }
}
