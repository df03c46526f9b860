//! Worker liveness probes.

use std::time::Duration;

use async_trait::async_trait;

/// Checks whether the worker listening on a port is alive.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_alive(&self, port: u16) -> bool;
}

/// Probe that calls `GET /health/live` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    fn url(&self, port: u16) -> String {
        format!("http://{}:{}/health/live", self.host, port)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn is_alive(&self, port: u16) -> bool {
        match self.client.get(self.url(port)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(port, error = %e, "Liveness probe failed");
                false
            }
        }
    }
}
