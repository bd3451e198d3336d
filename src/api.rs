//! Session REST collaborators
//!
//! Plain request/response operations that sit next to the streaming
//! contract: fetching a session snapshot by id (initial load and
//! fallback polling), create/restart/complete, and the separate outbound
//! message path used when the stream is degraded to the unidirectional
//! fallback.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::error::{FormStreamError, Result};
use crate::session::state::Session;

/// Typed client for the session REST endpoints
///
/// All endpoints resolve relative to one configured base service
/// address; credentials travel as static headers on every request, the
/// same map the stream connectors use.
#[derive(Debug, Clone)]
pub struct SessionApi {
    /// Underlying reqwest HTTP client
    http_client: reqwest::Client,
    /// Service base URL
    base_url: url::Url,
    /// Static headers merged into every request
    headers: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    agent_id: &'a str,
}

#[derive(Debug, Serialize)]
struct PostMessageBody<'a> {
    content: &'a str,
}

impl SessionApi {
    /// Construct a client targeting `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The service base address (e.g. `https://host/`).
    /// * `headers` - Extra headers for every request. Auth tokens go here.
    /// * `timeout` - Per-request timeout.
    pub fn new(base_url: url::Url, headers: HashMap<String, String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            // Default client construction only fails if TLS initialisation
            // fails, which is a fatal startup condition.
            .expect("failed to build reqwest client");

        Self {
            http_client,
            base_url,
            headers,
        }
    }

    /// Fetch the current snapshot for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::Api`] on a non-success status and
    /// [`FormStreamError::Http`] on request failure.
    pub async fn fetch_session(&self, session_id: &str) -> Result<Session> {
        let url = self.endpoint(&format!("sessions/{}", session_id))?;
        let response = self.request(self.http_client.get(url)).await?;
        Ok(response.json::<Session>().await?)
    }

    /// Create a new session for `agent_id` and return its snapshot.
    pub async fn create_session(&self, agent_id: &str) -> Result<Session> {
        let url = self.endpoint("sessions")?;
        let response = self
            .request(self.http_client.post(url).json(&CreateSessionBody { agent_id }))
            .await?;
        Ok(response.json::<Session>().await?)
    }

    /// Restart `session_id`, resetting its status to in-progress.
    pub async fn restart_session(&self, session_id: &str) -> Result<Session> {
        let url = self.endpoint(&format!("sessions/{}/restart", session_id))?;
        let response = self.request(self.http_client.post(url)).await?;
        Ok(response.json::<Session>().await?)
    }

    /// Mark `session_id` as completed on the server.
    pub async fn complete_session(&self, session_id: &str) -> Result<Session> {
        let url = self.endpoint(&format!("sessions/{}/complete", session_id))?;
        let response = self.request(self.http_client.post(url)).await?;
        Ok(response.json::<Session>().await?)
    }

    /// Post a visitor message over the request path.
    ///
    /// This is the outbound channel for degraded (unidirectional)
    /// streams, which have no socket to send on.
    pub async fn post_message(&self, session_id: &str, content: &str) -> Result<()> {
        let url = self.endpoint(&format!("sessions/{}/messages", session_id))?;
        let _ = self
            .request(self.http_client.post(url).json(&PostMessageBody { content }))
            .await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url
            .join(path)
            .map_err(|e| anyhow::anyhow!(FormStreamError::Config(format!(
                "invalid api endpoint {}: {}",
                path, e
            ))))
    }

    /// Attach headers, send, and map non-success statuses to [`FormStreamError::Api`].
    async fn request(&self, mut builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(FormStreamError::Api(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            ))));
        }
        Ok(response)
    }
}
