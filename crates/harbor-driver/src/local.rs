use async_trait::async_trait;
use harbor_domain::{Ship, ShipSpec};
use tracing::debug;

use crate::driver::{ContainerInfo, Driver};
use crate::error::DriverError;

/// A stub driver that simulates container lifecycle locally, performing no
/// real container-runtime I/O. Used in tests and for exercising the rest of
/// the core without a Docker or Kubernetes daemon available.
#[derive(Debug, Default, Clone)]
pub struct LocalDriver;

impl LocalDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn create_ship_container(
        &self,
        ship: &Ship,
        _spec: Option<&ShipSpec>,
    ) -> Result<ContainerInfo, DriverError> {
        debug!(ship_id = %ship.id, "LocalDriver: create_ship_container");
        Ok(ContainerInfo {
            container_id: format!("local-{}", ship.id),
            ip_address: Some("127.0.0.1:0".to_string()),
            status: "running".to_string(),
        })
    }

    async fn stop_ship_container(&self, container_id: &str) -> Result<bool, DriverError> {
        debug!(container_id, "LocalDriver: stop_ship_container");
        Ok(true)
    }

    fn ship_data_exists(&self, _ship_id: &str) -> bool {
        true
    }

    async fn get_container_logs(&self, _container_id: &str) -> Result<String, DriverError> {
        Ok(String::new())
    }

    async fn is_container_running(&self, _container_id: &str) -> Result<bool, DriverError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use harbor_domain::ShipId;

    #[tokio::test]
    async fn create_returns_an_address() {
        let driver = LocalDriver::new();
        let ship = Ship::new_creating(ShipId::generate(), 60, Utc::now());
        let info = driver.create_ship_container(&ship, None).await.unwrap();
        assert!(info.ip_address.is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let driver = LocalDriver::new();
        assert!(driver.stop_ship_container("anything").await.unwrap());
        assert!(driver.stop_ship_container("anything").await.unwrap());
    }
}
