//! HTTP client for the search sink
//!
//! Shared by the bulk sink, index administration and the query tool.

use crate::config::SinkConfig;
use crate::sink::SinkError;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client bound to one sink base URL
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl SearchClient {
    /// Create a new client
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request, with credentials attached when configured
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Send a request and return the response body.
    ///
    /// Non-success statuses listed in `ignore` are returned like successes;
    /// any other error status becomes [`SinkError::Rejected`].
    pub async fn send(&self, request: RequestBuilder, ignore: &[u16]) -> Result<(u16, String), SinkError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(status, bytes = body.len(), "Sink response");

        if (200..300).contains(&status) || ignore.contains(&status) {
            Ok((status, body))
        } else {
            Err(SinkError::Rejected { status, body })
        }
    }

    /// Send an optional JSON body and parse a JSON response
    pub async fn json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        ignore: &[u16],
    ) -> Result<Value, SinkError> {
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let (_, text) = self.send(request, ignore).await?;
        parse_json(&text)
    }

    /// Send a request and return the raw text response
    pub async fn text(&self, method: Method, url: &str, ignore: &[u16]) -> Result<String, SinkError> {
        let (_, text) = self.send(self.request(method, url), ignore).await?;
        Ok(text)
    }
}

/// Empty bodies parse as `null`
pub(crate) fn parse_json(text: &str) -> Result<Value, SinkError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| SinkError::malformed(format!("invalid JSON body: {e}")))
}
