//! HTTP binding of the remote layout store, talking to `dashsync-server`.

use async_trait::async_trait;
use dash_sync_core::{Layout, RemoteError, RemoteStore};
use reqwest::StatusCode;
use std::time::Duration;

/// Timeout applied to every request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote store backed by `GET`/`PUT /layouts/{user_id}`.
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(server_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: normalize_base_url(server_url),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true if `GET /health` answers with a success status.
    pub async fn probe(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn layout_url(&self, user_id: &str) -> String {
        self.url(&format!("/layouts/{}", urlencoding::encode(user_id)))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn save(&self, user_id: &str, layout: &Layout) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.layout_url(user_id))
            .json(layout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }

    async fn load(&self, user_id: &str) -> Result<Option<Layout>, RemoteError> {
        let response = self
            .client
            .get(self.layout_url(user_id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        response
            .json::<Layout>()
            .await
            .map(Some)
            .map_err(|e| RemoteError::Rejected(format!("invalid layout payload: {}", e)))
    }
}

/// Stand-in used when no server is configured; the engine stays offline so
/// these methods are only reached if a caller forces a remote read.
pub struct NoRemote;

#[async_trait]
impl RemoteStore for NoRemote {
    async fn save(&self, _user_id: &str, _layout: &Layout) -> Result<(), RemoteError> {
        Err(RemoteError::Rejected("no server configured".into()))
    }

    async fn load(&self, _user_id: &str) -> Result<Option<Layout>, RemoteError> {
        Ok(None)
    }
}

/// Accepts `host:port`, `http(s)://` and legacy `ws(s)://` URLs.
fn normalize_base_url(server_url: &str) -> String {
    let base = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };
    base.trim_end_matches('/').to_string()
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(e.to_string())
    }
}

/// 5xx map to retryable server errors, everything else is a rejection.
fn status_error(status: StatusCode, body: String) -> RemoteError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.trim().to_string()
    };

    if status.is_server_error() {
        RemoteError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        RemoteError::Rejected(format!("{} {}", status.as_u16(), message))
    }
}
