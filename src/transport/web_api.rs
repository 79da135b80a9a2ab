// ABOUTME: Minimal Slack Web API client over reqwest for the calls the RTM transport needs
// ABOUTME: Handles bearer auth, `ok: false` responses, and cursor pagination

use botty_core::{BotError, Result, SlackConfig};
use serde_json::Value;
use std::time::Duration;

/// Page size for cursor-paginated list methods
const PAGE_LIMIT: &str = "200";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct WebApi {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

// Custom Debug impl to redact the token
impl std::fmt::Debug for WebApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebApi")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl WebApi {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BotError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Call a Web API method. HTTP failures map to `Connection`, `ok: false` to `Api`.
    pub async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, method);
        tracing::debug!(method, "Calling Slack Web API");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .map_err(|e| BotError::Connection(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Connection(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BotError::Protocol(format!("{} returned invalid JSON: {}", method, e)))?;
        check_response(method, body)
    }

    /// Call a list method repeatedly, following `response_metadata.next_cursor`,
    /// and concatenate the arrays found under `key`
    pub async fn paginate(
        &self,
        method: &str,
        params: &[(&str, &str)],
        key: &str,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut page_params: Vec<(&str, &str)> = params.to_vec();
            page_params.push(("limit", PAGE_LIMIT));
            if let Some(cursor) = cursor.as_deref() {
                page_params.push(("cursor", cursor));
            }

            let body = self.call(method, &page_params).await?;
            if let Some(page) = body.get(key).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }

            match next_cursor(&body) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(method, count = items.len(), "Fetched paginated list");
        Ok(items)
    }
}

/// Turn an `ok: false` body into `BotError::Api`
pub(crate) fn check_response(method: &str, body: Value) -> Result<Value> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let reason = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(BotError::Api {
        method: method.to_string(),
        reason,
    })
}

/// The cursor for the next page, or `None` when this was the last one
pub(crate) fn next_cursor(body: &Value) -> Option<String> {
    body.pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|cursor| !cursor.is_empty())
        .map(str::to_string)
}
