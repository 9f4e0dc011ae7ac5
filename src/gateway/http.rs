//! reqwest-backed client for the remote course platform API.
//!
//! Calls are instrumented and log paths, statuses and latencies (not bodies).
//!
//! NOTE: We never log the bearer token.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::ApiConfig;
use crate::domain::{ChallengeBoard, GamificationEvent, LeaderboardPeriod, Profile};
use crate::error::{GamifyError, GamifyResult};
use crate::forum::{ForumGateway, VoteTally, VoteValue};
use crate::util::trunc_for_log;

use super::{BadgesResponse, ClaimResponse, GamificationGateway, LeaderboardResponse};

const UA: &str = "coursequest-gamify/0.1";

#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base: Url,
  base_url: String,
  token: Option<String>,
}

impl HttpGateway {
  pub fn new(api: &ApiConfig, token: Option<String>) -> GamifyResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(api.timeout_secs))
      .build()?;
    let base_url = api.base_url.trim_end_matches('/').to_string();
    let base = Url::parse(&base_url)
      .ok()
      .filter(|u| !u.cannot_be_a_base())
      .ok_or_else(|| GamifyError::InvalidState(format!("unusable API base URL: {}", base_url)))?;
    Ok(Self { client, base, base_url, token })
  }

  pub fn base_url(&self) -> &str { &self.base_url }

  /// Base URL plus path segments. Each segment is percent-encoded, so an id
  /// can never add path components or a query.
  fn endpoint(&self, segments: &[&str]) -> GamifyResult<Url> {
    if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
      return Err(GamifyError::PreconditionFailed(format!("invalid id in request path: {:?}", bad)));
    }
    let mut url = self.base.clone();
    url.path_segments_mut()
      .map_err(|_| GamifyError::InvalidState(format!("unusable API base URL: {}", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> GamifyResult<RequestBuilder> {
    let token = self.token.as_deref().ok_or(GamifyError::NotAuthenticated)?;
    Ok(self.client.request(method, url)
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", token)))
  }

  /// Send and check status; non-2xx becomes `GamifyError::Http` with the
  /// server's message when one can be extracted.
  async fn send(&self, path: &str, req: RequestBuilder) -> GamifyResult<reqwest::Response> {
    let start = Instant::now();
    let res = req.send().await.map_err(|e| {
      error!(target: "gateway", %path, elapsed = ?start.elapsed(), error = %e, "Request failed");
      GamifyError::from(e)
    })?;

    let status = res.status();
    debug!(target: "gateway", %path, status = status.as_u16(), elapsed = ?start.elapsed(), "Response received");
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(GamifyError::Http { status: status.as_u16(), message });
    }
    Ok(res)
  }

  async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, String)]) -> GamifyResult<T> {
    let url = self.endpoint(segments)?;
    let path = url.path().to_string();
    let req = self.request(Method::GET, url)?.query(query);
    let res = self.send(&path, req).await?;
    Ok(res.json::<T>().await?)
  }

  async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> GamifyResult<T> {
    let url = self.endpoint(segments)?;
    let path = url.path().to_string();
    let req = self.request(Method::POST, url)?.json(body);
    let res = self.send(&path, req).await?;
    Ok(res.json::<T>().await?)
  }

  async fn post_empty(&self, segments: &[&str]) -> GamifyResult<()> {
    let url = self.endpoint(segments)?;
    let path = url.path().to_string();
    let req = self.request(Method::POST, url)?;
    self.send(&path, req).await?;
    Ok(())
  }
}

#[async_trait]
impl GamificationGateway for HttpGateway {
  #[instrument(level = "debug", skip(self))]
  async fn get_profile(&self) -> GamifyResult<Profile> {
    self.get_json(&["gamification", "profile"], &[]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_badges(&self) -> GamifyResult<BadgesResponse> {
    self.get_json(&["gamification", "badges"], &[]).await
  }

  #[instrument(level = "debug", skip(self), fields(period = period.as_str()))]
  async fn get_leaderboard(&self, period: LeaderboardPeriod, page: u32, limit: u32) -> GamifyResult<LeaderboardResponse> {
    let query = [("period", period.as_str().to_string()), ("page", page.to_string()), ("limit", limit.to_string())];
    self.get_json(&["gamification", "leaderboard"], &query).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_challenges(&self) -> GamifyResult<ChallengeBoard> {
    self.get_json(&["gamification", "challenges"], &[]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn claim_challenge(&self, id: &str) -> GamifyResult<ClaimResponse> {
    self.post_json(&["gamification", "challenges", id, "claim"], &serde_json::json!({})).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_events(&self) -> GamifyResult<Vec<GamificationEvent>> {
    self.get_json(&["gamification", "events"], &[]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn mark_event_seen(&self, id: &str) -> GamifyResult<()> {
    self.post_empty(&["gamification", "events", id, "seen"]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn mark_event_read(&self, id: &str) -> GamifyResult<()> {
    self.post_empty(&["gamification", "events", id, "read"]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn mark_all_events_read(&self) -> GamifyResult<()> {
    self.post_empty(&["gamification", "events", "read-all"]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_event_history(&self, limit: u32) -> GamifyResult<Vec<GamificationEvent>> {
    self.get_json(&["gamification", "events", "history"], &[("limit", limit.to_string())]).await
  }
}

#[async_trait]
impl ForumGateway for HttpGateway {
  #[instrument(level = "debug", skip(self))]
  async fn vote(&self, post_id: &str, value: VoteValue) -> GamifyResult<VoteTally> {
    #[derive(Serialize)]
    struct VoteIn { value: i8 }
    self.post_json(&["forum", "posts", post_id, "vote"], &VoteIn { value: value.as_i8() }).await
  }
}

/// Try to extract a clean error message from the API error body.
/// Accepts `{"detail": "..."}`, `{"message": "..."}` and `{"error": {"message": "..."}}`.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EObj { message: String }
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum EWrap {
    Detail { detail: String },
    Message { message: String },
    Nested { error: EObj },
  }
  match serde_json::from_str::<EWrap>(body).ok()? {
    EWrap::Detail { detail } => Some(detail),
    EWrap::Message { message } => Some(message),
    EWrap::Nested { error } => Some(error.message),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_common_error_shapes() {
    assert_eq!(extract_api_error(r#"{"detail":"Challenge already claimed"}"#).as_deref(), Some("Challenge already claimed"));
    assert_eq!(extract_api_error(r#"{"message":"nope"}"#).as_deref(), Some("nope"));
    assert_eq!(extract_api_error(r#"{"error":{"message":"boom"}}"#).as_deref(), Some("boom"));
    assert_eq!(extract_api_error("<html>502</html>"), None);
  }

  #[tokio::test]
  async fn requests_without_token_fail_fast() {
    let gw = HttpGateway::new(&ApiConfig::default(), None).unwrap();
    assert_eq!(gw.get_profile().await.unwrap_err(), GamifyError::NotAuthenticated);
  }

  #[test]
  fn base_url_is_normalized() {
    let api = ApiConfig { base_url: "http://api.local/v1/".into(), timeout_secs: 5 };
    let gw = HttpGateway::new(&api, Some("t".into())).unwrap();
    assert_eq!(gw.base_url(), "http://api.local/v1");
  }

  #[test]
  fn ids_stay_inside_their_path_segment() {
    let api = ApiConfig { base_url: "http://api.local/v1/".into(), timeout_secs: 5 };
    let gw = HttpGateway::new(&api, Some("t".into())).unwrap();

    let url = gw.endpoint(&["gamification", "challenges", "d1", "claim"]).unwrap();
    assert_eq!(url.as_str(), "http://api.local/v1/gamification/challenges/d1/claim");

    let url = gw.endpoint(&["gamification", "challenges", "../../admin?x=1", "claim"]).unwrap();
    assert_eq!(url.path(), "/v1/gamification/challenges/..%2F..%2Fadmin%3Fx=1/claim");
    assert_eq!(url.query(), None);

    for bad in ["..", ".", ""] {
      assert!(matches!(gw.endpoint(&["forum", "posts", bad, "vote"]), Err(GamifyError::PreconditionFailed(_))));
    }
  }

  #[tokio::test]
  async fn bad_id_fails_before_any_request() {
    let gw = HttpGateway::new(&ApiConfig::default(), Some("t".into())).unwrap();
    assert!(matches!(gw.mark_event_seen("..").await, Err(GamifyError::PreconditionFailed(_))));
  }

  #[test]
  fn unusable_base_url_is_rejected() {
    let api = ApiConfig { base_url: "mailto:someone".into(), timeout_secs: 5 };
    assert!(matches!(HttpGateway::new(&api, None), Err(GamifyError::InvalidState(_))));
  }
}
