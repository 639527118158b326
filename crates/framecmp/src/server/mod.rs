//! Client for the backend that resolves pair ids and runs parity checks.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CompareError;
use crate::media::MediaRef;

/// Which server-side check a parity request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParityMethod {
    /// Pixel comparison of two still images.
    Pixelmatch,
    /// Full validation, used as soon as one side is a video.
    Validate,
}

impl ParityMethod {
    pub fn for_pair(left_is_still: bool, right_is_still: bool) -> Self {
        if left_is_still && right_is_still {
            Self::Pixelmatch
        } else {
            Self::Validate
        }
    }
}

impl fmt::Display for ParityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pixelmatch => f.write_str("pixelmatch"),
            Self::Validate => f.write_str("validate"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParityRequest {
    pub left: String,
    pub right: String,
    pub method: ParityMethod,
    pub wait: bool,
}

/// Pass/fail verdict plus whatever log text the server attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParityOutcome {
    pub passed: bool,
    pub logs: String,
}

impl ParityOutcome {
    /// The body is opaque apart from the verdict. Accepts `pass`, `ok`,
    /// `passed` or a `status` of `"pass"`/`"passed"`/`"ok"`; `logs` may be a
    /// string or an array of lines.
    fn from_body(body: &serde_json::Value) -> Self {
        let passed = ["pass", "passed", "ok"]
            .iter()
            .find_map(|k| body[*k].as_bool())
            .or_else(|| {
                body["status"]
                    .as_str()
                    .map(|s| matches!(s.to_ascii_lowercase().as_str(), "pass" | "passed" | "ok"))
            })
            .unwrap_or(false);
        let logs = match &body["logs"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(lines) => lines
                .iter()
                .map(|l| l.as_str().map(str::to_string).unwrap_or_else(|| l.to_string()))
                .collect::<Vec<_>>()
                .join("\n"),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        Self { passed, logs }
    }
}

#[derive(Debug, Deserialize)]
struct PairResponse {
    left: String,
    right: String,
}

pub struct ServerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a server-side pair id to its two media locations.
    pub async fn resolve_pair(&self, id: &str) -> Result<(MediaRef, MediaRef), CompareError> {
        let url = format!("{}/api/compare/pairs/{id}", self.base_url);
        debug!(url = %url, "resolving pair");
        let pair: PairResponse = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CompareError::Server(format!("GET {url}: {e}")))?
            .json()
            .await
            .map_err(|e| CompareError::Server(format!("invalid pair response from {url}: {e}")))?;
        info!(id, left = %pair.left, right = %pair.right, "pair resolved");
        Ok((MediaRef::parse(&pair.left), MediaRef::parse(&pair.right)))
    }

    /// Submit a pair for the server's parity check.
    ///
    /// A non-2xx status is an error; a 2xx body is read for the verdict.
    pub async fn parity(&self, request: &ParityRequest) -> Result<ParityOutcome, CompareError> {
        let url = format!("{}/api/compare/parity", self.base_url);
        info!(method = %request.method, wait = request.wait, "requesting parity check");
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CompareError::Server(format!("POST {url}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CompareError::Server(format!("read {url}: {e}")))?;
        if !status.is_success() {
            return Err(CompareError::Server(format!("POST {url} returned {status}: {text}")));
        }
        let body: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let outcome = ParityOutcome::from_body(&body);
        debug!(passed = outcome.passed, "parity response");
        Ok(outcome)
    }
}
