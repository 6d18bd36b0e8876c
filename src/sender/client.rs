use crate::domain::AuditEvent;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid collector URL: {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    BuildFailed(String),
}

/// Outcome of a failed delivery attempt. Errors crossing the sender boundary
/// are values, never panics; the retry/circuit wrappers compose on these.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("collector returned HTTP {status}")]
    Http { status: u16 },
    #[error("payload serialization failed: {0}")]
    Serialization(String),
    #[error("circuit breaker open, delivery skipped")]
    CircuitOpen,
}

impl SendError {
    /// Transient failures are worth retrying; everything else goes straight
    /// to the spool.
    pub fn is_transient(&self) -> bool {
        match self {
            SendError::Timeout | SendError::Connection(_) => true,
            SendError::Http { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            SendError::Serialization(_) | SendError::CircuitOpen => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collector base address; the ingestion and liveness paths derive from it.
    pub base_url: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8000").expect("static URL"),
            api_key: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("audit-forwarder/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client for the collector: batch ingestion plus the liveness probe.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: Client,
    config: ClientConfig,
    events_url: Url,
    health_url: Url,
}

impl CollectorClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let events_url = config
            .base_url
            .join("api/events")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let health_url = config
            .base_url
            .join("health")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ClientError::BuildFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            events_url,
            health_url,
        })
    }

    pub fn events_url(&self) -> &Url {
        &self.events_url
    }

    /// Posts one batch as a JSON array. Any 2xx is success; everything else,
    /// including transport errors, is a delivery failure value.
    pub async fn send_batch(&self, events: &[AuditEvent]) -> Result<(), SendError> {
        let mut request = self.client.post(self.events_url.clone()).json(events);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SendError::Http {
                status: status.as_u16(),
            })
        }
    }

    /// Liveness probe: GET the health endpoint; on 404 (collector without a
    /// health route) fall back to a HEAD against the ingestion path.
    /// Connection errors and timeouts read as unhealthy.
    pub async fn check_health(&self) -> bool {
        let mut request = self.client.get(self.health_url.clone());
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-Key", api_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                self.head_events_endpoint().await
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "health probe rejected");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    async fn head_events_endpoint(&self) -> bool {
        let mut request = self.client.head(self.events_url.clone());
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-Key", api_key);
        }

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "fallback HEAD probe failed");
                false
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> SendError {
    if e.is_timeout() {
        SendError::Timeout
    } else if e.is_connect() {
        SendError::Connection(e.to_string())
    } else if e.is_body() || e.is_decode() {
        SendError::Serialization(e.to_string())
    } else {
        SendError::Connection(e.to_string())
    }
}
