//! Remote publish clients
//!
//! The pipeline talks to the publish service through [`PublishClient`], an
//! async trait returning classified errors so the backoff layer can branch
//! on kind. The concrete [`XApiClient`] speaks the X v2 tweet endpoint;
//! [`NullClient`] backs dry runs and tests that must never touch the
//! network.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{ConfigError, PublishError, Result};

/// A remote service that accepts message text (optionally as a reply) and
/// answers with a JSON document carrying the new message's id.
#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<Value, PublishError>;
}

/// Pull the remote message id out of a publish response.
///
/// Known shapes, tried in order: `{"data": {"id": ...}}` (X v2), then a
/// flat `{"id": ...}`. The id may arrive as a string or an integer. This
/// is a compatibility seam; new shapes get appended here.
pub fn extract_message_id(response: &Value) -> Option<String> {
    let candidates = [response.get("data").and_then(|d| d.get("id")), response.get("id")];

    for id in candidates.into_iter().flatten() {
        match id {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Number(n) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

pub struct XApiClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl XApiClient {
    /// Build a client from config, reading the bearer token from the
    /// configured file.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let token_path = shellexpand::tilde(&config.bearer_token_file).to_string();
        let bearer_token = std::fs::read_to_string(&token_path)
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "Cannot read bearer token file {}: {}",
                    token_path, e
                ))
            })?
            .trim()
            .to_string();

        if bearer_token.is_empty() {
            return Err(
                ConfigError::Invalid(format!("Bearer token file {} is empty", token_path)).into(),
            );
        }

        Ok(Self::new(config.base_url.clone(), bearer_token))
    }

    pub fn new(base_url: String, bearer_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    /// Derive a wait hint from rate-limit response headers: `retry-after`
    /// (delta seconds) wins, else `x-rate-limit-reset` (epoch seconds) is
    /// converted to a delta, clamped to at least 1s.
    fn reset_hint(response: &reqwest::Response) -> Option<u64> {
        let headers = response.headers();

        if let Some(secs) = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            return Some(secs.max(1));
        }

        headers
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map(|reset| {
                let now = chrono::Utc::now().timestamp();
                (reset - now).max(1) as u64
            })
    }
}

#[async_trait]
impl PublishClient for XApiClient {
    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<Value, PublishError> {
        let mut body = json!({ "text": text });
        if let Some(target) = reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": target });
        }

        let response = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Fatal(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = Self::reset_hint(&response);
            debug!("Publish rate limited, reset hint: {:?}s", retry_after);
            return Err(PublishError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PublishError::Fatal(format!(
                "Publish rejected with status {}: {}",
                status, detail
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PublishError::Fatal(format!("Malformed publish response: {}", e)))
    }
}

/// A client that never performs network I/O. Returns a fabricated response
/// so downstream id extraction still exercises the real code path.
pub struct NullClient;

#[async_trait]
impl PublishClient for NullClient {
    async fn publish(
        &self,
        _text: &str,
        _reply_to: Option<&str>,
    ) -> std::result::Result<Value, PublishError> {
        Ok(json!({ "data": { "id": "dry-run" } }))
    }
}
