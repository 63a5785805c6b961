//! HTTP implementation of [`TelemetryApi`].
//!
//! One GET per channel and window. The application key and optional basic
//! auth credentials are fixed for the lifetime of the client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::{ChannelRequest, TelemetryApi, WindowParams, query_params};

/// Longest error body kept in [`Error::Remote`] messages.
const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Connection settings for the remote telemetry API.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Endpoint URL the channel queries are sent to.
    pub base_url: String,
    /// Application key sent as the `appkey` parameter.
    pub app_key: String,
    /// Basic auth user, if the deployment requires it.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Names of the window parameters.
    pub window_params: WindowParams,
}

impl HttpConfig {
    /// Create a config with default timeout (60s) and parameter names.
    pub fn new(base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(60),
            window_params: WindowParams::default(),
        }
    }
}

/// Remote telemetry API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTelemetryApi {
    client: Client,
    config: HttpConfig,
}

impl HttpTelemetryApi {
    /// Build a client. Fails if the base URL is not http(s).
    pub fn new(mut config: HttpConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "base URL must start with http:// or https://, got: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn get(&self) -> reqwest::RequestBuilder {
        let builder = self.client.get(&self.config.base_url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    fn send_error(&self, operation: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                operation: operation.to_string(),
                duration: self.config.timeout,
            }
        } else {
            Error::Transport(e.to_string())
        }
    }
}

async fn remote_error(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();

    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
    };

    Error::Remote {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl TelemetryApi for HttpTelemetryApi {
    async fn fetch_xml(&self, request: &ChannelRequest) -> Result<String> {
        let operation = format!("fetch channel {}", request.channel);
        let params = self.query_params(request);

        debug!(
            "GET {} channel={} setup={}",
            self.config.base_url, request.channel, request.window.setup_id
        );

        let response = self
            .get()
            .query(&[("appkey", self.config.app_key.as_str())])
            .query(&params)
            .send()
            .await
            .map_err(|e| self.send_error(&operation, e))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        // A body that stops mid-stream surfaces here; whatever arrived is lost
        response.text().await.map_err(|e| {
            if e.is_timeout() {
                self.send_error(&operation, e)
            } else {
                debug!("Body read failed for channel {}: {}", request.channel, e);
                Error::Truncated {
                    channel: request.channel,
                    received_bytes: 0,
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .get()
            .query(&[("appkey", self.config.app_key.as_str())])
            .send()
            .await
            .map_err(|e| self.send_error("ping", e))?;

        let status = response.status();
        if status.is_server_error()
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(remote_error(response).await);
        }
        Ok(())
    }

    fn query_params(&self, request: &ChannelRequest) -> BTreeMap<String, String> {
        query_params(request, self.config.window_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_url() {
        let err = HttpTelemetryApi::new(HttpConfig::new("ftp://example.com", "key")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_trims_trailing_slash() {
        let api = HttpTelemetryApi::new(HttpConfig::new("https://example.com/api/", "key")).unwrap();
        assert_eq!(api.base_url(), "https://example.com/api");
    }

    #[test]
    fn test_query_params_follow_config() {
        use sapwatch_types::FetchWindow;
        use time::macros::datetime;

        let mut config = HttpConfig::new("http://localhost:9", "key");
        config.window_params = WindowParams::FromTill;
        let api = HttpTelemetryApi::new(config).unwrap();

        let request = ChannelRequest::new(
            3,
            FetchWindow::new(
                "1",
                datetime!(2023-01-01 0:00 UTC),
                datetime!(2023-01-02 0:00 UTC),
            ),
        );
        let params = api.query_params(&request);
        assert!(params.contains_key("from"));
        assert!(params.contains_key("till"));
        assert!(!params.contains_key("appkey"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let mut config = HttpConfig::new("http://127.0.0.1:9", "key");
        config.timeout = Duration::from_secs(2);
        let api = HttpTelemetryApi::new(config).unwrap();

        match api.ping().await {
            Err(Error::Transport(_)) | Err(Error::Timeout { .. }) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
    }
}
