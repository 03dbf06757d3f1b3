//! Client for Caddy's admin API.
//!
//! Replacing the route array is a three-step state machine:
//!
//! ```text
//!   PATCH ──ok──► Patched
//!     │
//!    fail
//!     ▼
//!   DELETE (result ignored)
//!     │
//!     ▼
//!   PUT ──ok──► Replaced
//!     │
//!    fail ──► SyncError
//! ```

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Longest slice of a rejection body kept for logs.
const MAX_ERROR_BODY: usize = 400;

/// How a route array reached Caddy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The PATCH succeeded.
    Patched,
    /// The PATCH failed and the DELETE + PUT fallback succeeded.
    Replaced,
}

impl SyncOutcome {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patched => "patched",
            Self::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PushStep {
    Patch,
    Delete,
    Put,
}

/// Thin client for the routes resource of one Caddy server.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    routes_url: String,
}

impl AdminClient {
    /// Create a client for `{admin_url}/config/apps/http/servers/{server}/routes`.
    pub fn new(admin_url: &str, server_name: &str, timeout: Duration) -> SyncResult<Self> {
        let admin_url = admin_url.trim_end_matches('/');
        if admin_url.is_empty() {
            return Err(SyncError::config("Caddy admin URL is empty"));
        }
        if server_name.is_empty() || server_name.contains('/') {
            return Err(SyncError::config(format!(
                "invalid Caddy server name {server_name:?}"
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::Client)?;

        Ok(Self {
            http,
            routes_url: format!("{admin_url}/config/apps/http/servers/{server_name}/routes"),
        })
    }

    /// The routes resource URL.
    pub fn routes_url(&self) -> &str {
        &self.routes_url
    }

    /// Replace the server's route array with `body` (a JSON array).
    pub async fn replace_routes(&self, body: Vec<u8>) -> SyncResult<SyncOutcome> {
        let mut step = PushStep::Patch;
        loop {
            step = match step {
                PushStep::Patch => match self.send(Method::PATCH, Some(body.clone())).await {
                    Ok(()) => return Ok(SyncOutcome::Patched),
                    Err(e) => {
                        warn!(
                            url = %self.routes_url,
                            error = %e,
                            "caddy sync patch failed, falling back to delete and put"
                        );
                        PushStep::Delete
                    }
                },
                PushStep::Delete => {
                    match self.send(Method::DELETE, None).await {
                        Ok(()) => info!(url = %self.routes_url, "caddy sync deleted routes"),
                        Err(e) => warn!(error = %e, "caddy sync delete failed"),
                    }
                    PushStep::Put
                }
                PushStep::Put => {
                    return self
                        .send(Method::PUT, Some(body))
                        .await
                        .map(|()| SyncOutcome::Replaced);
                }
            };
        }
    }

    async fn send(&self, method: Method, body: Option<Vec<u8>>) -> SyncResult<()> {
        let mut request = self.http.request(method.clone(), &self.routes_url);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(|source| SyncError::Request {
            method: method.clone(),
            source,
        })?;

        let status = response.status();
        debug!(method = %method, status = status.as_u16(), "caddy admin call");
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(SyncError::Rejected {
            method,
            status,
            body: truncate(&text, MAX_ERROR_BODY).to_string(),
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
