use async_trait::async_trait;
use harbor_domain::{Ship, ShipSpec};

use crate::error::DriverError;

/// Result of successfully starting a Ship's container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// Opaque handle the Driver uses to reference this container later
    /// (a Docker container id, a Kubernetes pod name, ...).
    pub container_id: String,
    /// Address the Proxy should forward requests to. `None` only while the
    /// container is still starting.
    pub ip_address: Option<String>,
    /// Raw runtime status string, informational only.
    pub status: String,
}

/// Runtime-agnostic interface for creating, stopping, and inspecting Ship
/// containers. Each `container_driver` setting resolves to one implementation;
/// the rest of the core never branches on which runtime is in play.
///
/// "Already removed" / "no such container" count as success everywhere a
/// teardown operation can encounter them — Ships frequently get cleaned up
/// twice (once by an operator, once by the Scheduler) and neither caller
/// should have to distinguish that from a real failure.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Establish the runtime client connection. Called once at startup;
    /// implementations should be idempotent since `harbor-server` may retry.
    async fn initialize(&self) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;

    /// Create and start a container for `ship`, applying `spec`'s resource
    /// limits if present. Returns once the container has an address.
    async fn create_ship_container(
        &self,
        ship: &Ship,
        spec: Option<&ShipSpec>,
    ) -> Result<ContainerInfo, DriverError>;

    /// Stop and remove the container, preserving any data a restore would
    /// need. Returns `Ok(true)` if the container is gone by the time this
    /// returns, whether or not it was already gone when called.
    async fn stop_ship_container(&self, container_id: &str) -> Result<bool, DriverError>;

    /// Permanently delete a Ship's persistent data. Host-mount-backed drivers
    /// default to a no-op: automatically deleting a host directory on
    /// container teardown is a data-loss risk the original explicitly
    /// declines to take, leaving cleanup to the operator.
    async fn delete_ship_data(&self, _container_id: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    /// Whether this Ship has on-disk (or PVC) data available for a restore.
    fn ship_data_exists(&self, ship_id: &str) -> bool;

    async fn get_container_logs(&self, container_id: &str) -> Result<String, DriverError>;

    async fn is_container_running(&self, container_id: &str) -> Result<bool, DriverError>;
}
