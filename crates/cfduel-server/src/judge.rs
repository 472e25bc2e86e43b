use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::JudgeConfig;

/// Errors surfaced by the judge facade.
#[derive(Debug, Clone, Error)]
pub enum JudgeError {
    /// Network failure, non-OK HTTP status, timeout, or a judge-level
    /// FAILED payload that isn't a handle rejection.
    #[error("judge unavailable: {0}")]
    Unavailable(String),
    /// The judge explicitly rejected the handle.
    #[error("handle {0} not found")]
    UnknownHandle(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeUser {
    pub handle: String,
    pub rating: Option<i32>,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeProblem {
    pub contest_id: u32,
    pub index: String,
    pub rating: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeSubmission {
    pub contest_id: u32,
    pub index: String,
    pub verdict: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JudgeSubmission {
    /// The judge reports accepted submissions with the verdict "OK".
    pub fn accepted(&self) -> bool {
        self.verdict.as_deref() == Some("OK")
    }
}

/// Typed facade over the judge's three read endpoints. Services hold
/// `Arc<dyn JudgeClient>` so tests can substitute a stub.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn resolve_user(&self, handle: &str) -> Result<JudgeUser, JudgeError>;
    async fn all_problems(&self) -> Result<Vec<JudgeProblem>, JudgeError>;
    async fn recent_submissions(
        &self,
        handle: &str,
        count: u32,
    ) -> Result<Vec<JudgeSubmission>, JudgeError>;
}

// ---- wire types -----------------------------------------------------------

/// Every judge response is wrapped in `{status, comment?, result?}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    comment: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    handle: String,
    rating: Option<i32>,
    avatar: Option<String>,
    title_photo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProblemSet {
    problems: Vec<WireProblem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProblem {
    contest_id: Option<u32>,
    index: String,
    rating: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubmission {
    problem: WireSubmissionProblem,
    verdict: Option<String>,
    creation_time_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubmissionProblem {
    contest_id: Option<u32>,
    index: String,
}

/// Unwrap a judge envelope, mapping FAILED payloads onto the error
/// taxonomy. `handle` feeds the UnknownHandle message when the comment
/// names a missing handle.
fn unwrap_envelope<T: DeserializeOwned>(body: &str, handle: &str) -> Result<T, JudgeError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| JudgeError::Unavailable(format!("malformed judge response: {e}")))?;

    if envelope.status != "OK" {
        let comment = envelope.comment.unwrap_or_default();
        if comment.to_lowercase().contains("not found") {
            return Err(JudgeError::UnknownHandle(handle.to_string()));
        }
        return Err(JudgeError::Unavailable(format!(
            "judge reported failure: {comment}"
        )));
    }

    envelope
        .result
        .ok_or_else(|| JudgeError::Unavailable("judge response missing result".to_string()))
}

// ---- HTTP implementation --------------------------------------------------

/// Reqwest-backed judge client with a hard per-call timeout.
pub struct HttpJudgeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJudgeClient {
    pub fn new(config: &JudgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cfduel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, path_and_query: &str) -> Result<String, JudgeError> {
        let url = format!("{}/{path_and_query}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| JudgeError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(JudgeError::Unavailable(format!(
                "judge returned {}",
                resp.status()
            )));
        }

        resp.text()
            .await
            .map_err(|e| JudgeError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl JudgeClient for HttpJudgeClient {
    async fn resolve_user(&self, handle: &str) -> Result<JudgeUser, JudgeError> {
        let body = self.fetch(&format!("user.info?handles={handle}")).await?;
        let users: Vec<WireUser> = unwrap_envelope(&body, handle)?;
        let user = users
            .into_iter()
            .next()
            .ok_or_else(|| JudgeError::UnknownHandle(handle.to_string()))?;
        Ok(JudgeUser {
            handle: user.handle,
            rating: user.rating,
            avatar: user.avatar.or(user.title_photo).unwrap_or_default(),
        })
    }

    async fn all_problems(&self) -> Result<Vec<JudgeProblem>, JudgeError> {
        let body = self.fetch("problemset.problems").await?;
        let set: WireProblemSet = unwrap_envelope(&body, "")?;
        Ok(set
            .problems
            .into_iter()
            .filter_map(|p| {
                Some(JudgeProblem {
                    contest_id: p.contest_id?,
                    index: p.index,
                    rating: p.rating,
                })
            })
            .collect())
    }

    async fn recent_submissions(
        &self,
        handle: &str,
        count: u32,
    ) -> Result<Vec<JudgeSubmission>, JudgeError> {
        let body = self
            .fetch(&format!("user.status?handle={handle}&from=1&count={count}"))
            .await?;
        let submissions: Vec<WireSubmission> = unwrap_envelope(&body, handle)?;
        Ok(submissions
            .into_iter()
            .filter_map(|s| {
                Some(JudgeSubmission {
                    contest_id: s.problem.contest_id?,
                    index: s.problem.index,
                    verdict: s.verdict,
                    created_at: DateTime::from_timestamp(s.creation_time_seconds, 0)?,
                })
            })
            .collect())
    }
}
