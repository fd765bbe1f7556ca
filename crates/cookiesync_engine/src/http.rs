//! HTTP implementation of the remote API.

use crate::config::Endpoint;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteApi;
use async_trait::async_trait;
use cookiesync_protocol::{ApiCookie, ApiResponse, UserSettings, AUTH_OK_MESSAGE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-api-key";

/// Remote API over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Sends a request and validates the response envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        request: RequestBuilder,
    ) -> SyncResult<ApiResponse<T>> {
        let response = request
            .header(API_KEY_HEADER, endpoint.token())
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let message = if status == StatusCode::UNAUTHORIZED {
                "authentication failed: API key is invalid or expired".to_string()
            } else {
                body
            };
            return Err(SyncError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body)
            .map_err(|e| SyncError::Protocol(format!("malformed response body: {e}")))?;
        if !envelope.is_ok() {
            return Err(SyncError::Protocol(format!(
                "unexpected response code {}: {}",
                envelope.code, envelope.message
            )));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn push(&self, endpoint: &Endpoint, cookies: &[ApiCookie]) -> SyncResult<()> {
        let url = endpoint.route("sync")?;
        tracing::debug!(%url, count = cookies.len(), "pushing cookies");
        self.send::<serde_json::Value>(endpoint, self.client.post(url).json(cookies))
            .await?;
        Ok(())
    }

    async fn test_auth(&self, endpoint: &Endpoint) -> SyncResult<()> {
        let url = endpoint.route("auth/test")?;
        let envelope = self
            .send::<serde_json::Value>(endpoint, self.client.get(url))
            .await?;
        if envelope.message != AUTH_OK_MESSAGE {
            return Err(SyncError::Protocol(format!(
                "unexpected auth test message: {}",
                envelope.message
            )));
        }
        Ok(())
    }

    async fn user_settings(&self, endpoint: &Endpoint) -> SyncResult<UserSettings> {
        let url = endpoint.route("user/settings")?;
        self.send::<UserSettings>(endpoint, self.client.get(url))
            .await?
            .data
            .ok_or_else(|| SyncError::Protocol("user settings response has no data".into()))
    }

    async fn update_user_settings(
        &self,
        endpoint: &Endpoint,
        settings: UserSettings,
    ) -> SyncResult<()> {
        let url = endpoint.route("user/settings")?;
        self.send::<serde_json::Value>(endpoint, self.client.put(url).json(&settings))
            .await?;
        Ok(())
    }
}
