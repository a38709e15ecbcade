use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Builds the well-known health URL for a Ship address, ported from
/// `services/ship/url_builder.py`'s `build_ship_url`/`build_health_url`: an
/// address containing a colon already carries its own port (docker-host /
/// podman-host / kubernetes mode), one without needs `container_port` appended
/// (docker internal-network mode).
pub fn ship_health_url(address: &str, container_port: u16) -> String {
    if address.contains(':') {
        format!("http://{address}/health")
    } else {
        format!("http://{address}:{container_port}/health")
    }
}

/// Seam between the Resolver and the network, so the ladder's probing step
/// can be exercised in tests without binding a real socket.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// Polls a Ship's `/health` endpoint with a short per-request timeout,
/// matching `wait_for_ship_ready`'s `aiohttp.ClientTimeout(total=5)`.
pub struct HttpHealthCheck {
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client with a fixed timeout is always constructible");
        HttpHealthCheck { client }
    }
}

impl Default for HttpHealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "health probe request failed");
                false
            }
        }
    }
}

/// Polls `probe` at `interval` until it succeeds or `timeout` elapses.
pub async fn wait_until_healthy(
    health_check: &dyn HealthCheck,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if health_check.probe(url).await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
