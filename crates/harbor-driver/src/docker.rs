//! Docker (and Podman, which speaks the same API) container driver.
//!
//! Ported from `drivers/docker/base.py`'s `BaseDockerDriver`: one struct
//! covers both `docker`/`podman` (container-network addressing) and
//! `docker-host`/`podman-host` (host-port-mapped addressing), switched on
//! [`AddressMode`] the way the original switches on subclass.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use harbor_domain::{Ship, ShipSpec};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::driver::{ContainerInfo, Driver};
use crate::error::DriverError;
use crate::utils::{ensure_ship_dirs, parse_and_enforce_minimum_disk, parse_and_enforce_minimum_memory, ship_data_exists};

/// How the address of a created container is determined, mirroring the
/// original's `DockerDriver` (in-cluster, Docker-network IPs) vs.
/// `DockerHostDriver` (host-mapped ports) split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Harbor runs inside the same Docker network as its Ships; address them
    /// by their internal container IP.
    Internal,
    /// Harbor runs on the host; address Ships via `127.0.0.1:<mapped-port>`.
    HostMapped,
}

pub struct DockerDriver {
    socket_path: Option<String>,
    client: RwLock<Option<Arc<Docker>>>,
    image: String,
    network: Option<String>,
    container_port: u16,
    ship_data_dir: PathBuf,
    address_mode: AddressMode,
}

impl DockerDriver {
    /// `socket_path = None` connects to the default local socket; Podman
    /// variants pass their own socket path here (see `registry.rs`).
    pub fn new(
        socket_path: Option<String>,
        image: String,
        network: Option<String>,
        container_port: u16,
        ship_data_dir: PathBuf,
        address_mode: AddressMode,
    ) -> Self {
        DockerDriver {
            socket_path,
            client: RwLock::new(None),
            image,
            network,
            container_port,
            ship_data_dir,
            address_mode,
        }
    }

    async fn client(&self) -> Result<Arc<Docker>, DriverError> {
        if let Some(c) = self.client.read().await.as_ref() {
            return Ok(c.clone());
        }
        let mut guard = self.client.write().await;
        if let Some(c) = guard.as_ref() {
            return Ok(c.clone());
        }
        let docker = match &self.socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| DriverError::Internal(e.to_string()))?,
            None => Docker::connect_with_socket_defaults()
                .map_err(|e| DriverError::Internal(e.to_string()))?,
        };
        docker
            .version()
            .await
            .map_err(|e| DriverError::Internal(format!("docker connection test failed: {e}")))?;
        let docker = Arc::new(docker);
        *guard = Some(docker.clone());
        Ok(docker)
    }

    fn container_name(ship_id: &str) -> String {
        format!("ship-{ship_id}")
    }

    fn build_config(&self, ship: &Ship, spec: Option<&ShipSpec>) -> Result<Config<String>, DriverError> {
        self.build_config_with_disk_quota(ship, spec, true)
    }

    /// Builds the container config, optionally omitting `HostConfig.storage_opt`
    /// even when `spec` requests a disk quota — used for the retry-without-quota
    /// fallback when the runtime rejects `storage-opt` (see `create_ship_container`).
    fn build_config_with_disk_quota(
        &self,
        ship: &Ship,
        spec: Option<&ShipSpec>,
        include_disk_quota: bool,
    ) -> Result<Config<String>, DriverError> {
        let dirs = ensure_ship_dirs(&self.ship_data_dir, ship.id.as_str())?;
        let port_key = format!("{}/tcp", self.container_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding { host_ip: None, host_port: Some("0".to_string()) }]),
        );

        let mut host_config = HostConfig {
            restart_policy: Some(bollard::models::RestartPolicy {
                name: Some(bollard::models::RestartPolicyNameEnum::NO),
                ..Default::default()
            }),
            port_bindings: Some(port_bindings),
            binds: Some(vec![
                format!("{}:/home", dirs.home.display()),
                format!("{}:/app/metadata", dirs.metadata.display()),
            ]),
            ..Default::default()
        };

        if let Some(spec) = spec {
            if let Some(cpus) = spec.cpus {
                host_config.cpu_quota = Some((cpus * 100_000.0) as i64);
                host_config.cpu_period = Some(100_000);
            }
            if let Some(memory) = &spec.memory {
                host_config.memory = Some(parse_and_enforce_minimum_memory(memory) as i64);
            }
            if let Some(disk) = &spec.disk {
                if include_disk_quota {
                    let disk_bytes = parse_and_enforce_minimum_disk(disk);
                    let mut storage_opt = HashMap::new();
                    storage_opt.insert("size".to_string(), disk_bytes.to_string());
                    host_config.storage_opt = Some(storage_opt);
                }
            }
        }

        if let Some(network) = &self.network {
            host_config.network_mode = Some(network.clone());
        }

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let mut labels = HashMap::new();
        labels.insert("ship_id".to_string(), ship.id.to_string());
        labels.insert("created_by".to_string(), "harbor".to_string());

        Ok(Config {
            image: Some(self.image.clone()),
            env: Some(vec![
                format!("SHIP_ID={}", ship.id),
                format!("TTL={}", ship.ttl),
            ]),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        })
    }

    /// Stops and force-removes a partially-created container, swallowing any
    /// error — callers are already on a failure path and must not let cleanup
    /// itself fail the request (spec.md §4.1: "on any failure the Driver must
    /// best-effort remove the partial container").
    async fn best_effort_remove(&self, client: &Docker, name: &str) {
        let _ = client.stop_container(name, None).await;
        let _ = client
            .remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await;
    }

    fn extract_address(&self, info: &bollard::models::ContainerInspectResponse) -> Option<String> {
        let settings = info.network_settings.as_ref()?;
        match self.address_mode {
            AddressMode::Internal => {
                if let Some(network) = &self.network {
                    settings
                        .networks
                        .as_ref()
                        .and_then(|n| n.get(network))
                        .and_then(|n| n.ip_address.clone())
                        .filter(|ip| !ip.is_empty())
                } else {
                    settings.ip_address.clone().filter(|ip| !ip.is_empty())
                }
            }
            AddressMode::HostMapped => {
                let port_key = format!("{}/tcp", self.container_port);
                let mapped = settings
                    .ports
                    .as_ref()
                    .and_then(|p| p.get(&port_key))
                    .and_then(|bindings| bindings.as_ref())
                    .and_then(|bindings| bindings.first())
                    .and_then(|b| b.host_port.clone());
                mapped
                    .map(|port| format!("127.0.0.1:{port}"))
                    .or_else(|| {
                        warn!("no host port mapping found, falling back to container IP");
                        settings.ip_address.clone().filter(|ip| !ip.is_empty())
                    })
            }
        }
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        self.client().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        *self.client.write().await = None;
        Ok(())
    }

    async fn create_ship_container(
        &self,
        ship: &Ship,
        spec: Option<&ShipSpec>,
    ) -> Result<ContainerInfo, DriverError> {
        let client = self.client().await?;
        let name = Self::container_name(ship.id.as_str());
        let wants_disk_quota = spec.and_then(|s| s.disk.as_ref()).is_some();
        let config = self.build_config(ship, spec)?;

        if let Err(e) = client
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), config)
            .await
        {
            let message = e.to_string();
            let is_storage_opt_error =
                message.to_lowercase().contains("storage-opt") || message.to_lowercase().contains("storageopt");
            if !(is_storage_opt_error && wants_disk_quota) {
                return Err(DriverError::CreateFailed { ship_id: ship.id.to_string(), message });
            }
            warn!(
                ship_id = %ship.id,
                error = %message,
                "disk quota not supported by container runtime, retrying without it"
            );
            let retry_config = self.build_config_with_disk_quota(ship, spec, false)?;
            client
                .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), retry_config)
                .await
                .map_err(|e| DriverError::CreateFailed { ship_id: ship.id.to_string(), message: e.to_string() })?;
        }

        if let Err(e) = client.start_container::<String>(&name, None).await {
            error!(ship_id = %ship.id, container = %name, error = %e, "failed to start container, removing");
            self.best_effort_remove(&client, &name).await;
            return Err(DriverError::CreateFailed { ship_id: ship.id.to_string(), message: e.to_string() });
        }

        let info = match client.inspect_container(&name, None).await {
            Ok(info) => info,
            Err(e) => {
                error!(ship_id = %ship.id, container = %name, error = %e, "failed to inspect container after start, removing");
                self.best_effort_remove(&client, &name).await;
                return Err(DriverError::Internal(e.to_string()));
            }
        };

        let address = self.extract_address(&info);
        if address.is_none() {
            error!(ship_id = %ship.id, container = %name, "container started without a usable address");
            self.best_effort_remove(&client, &name).await;
            return Err(DriverError::AddressUnavailable {
                container_id: name,
                ship_id: ship.id.to_string(),
                details: Some("network settings did not expose an address".to_string()),
            });
        }

        let status = info
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        debug!(ship_id = %ship.id, container = %name, ?address, "ship container running");

        Ok(ContainerInfo { container_id: name, ip_address: address, status })
    }

    async fn stop_ship_container(&self, container_id: &str) -> Result<bool, DriverError> {
        let client = self.client().await?;
        match client
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(_) => {}
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                warn!(container_id, "container not found while stopping, treating as removed");
                return Ok(true);
            }
            Err(e) => {
                error!(container_id, error = %e, "failed to stop container");
                return Ok(false);
            }
        }
        match client
            .remove_container(container_id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(true),
            Err(e) => {
                error!(container_id, error = %e, "failed to remove container");
                Ok(false)
            }
        }
    }

    fn ship_data_exists(&self, ship_id: &str) -> bool {
        ship_data_exists(&self.ship_data_dir, ship_id)
    }

    async fn get_container_logs(&self, container_id: &str) -> Result<String, DriverError> {
        let client = self.client().await?;
        let mut stream = client.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "1000".to_string(),
                ..Default::default()
            }),
        );
        let mut logs = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => logs.push_str(&output.to_string()),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                    return Ok(String::new());
                }
                Err(e) => {
                    warn!(container_id, error = %e, "error reading container logs");
                    break;
                }
            }
        }
        Ok(logs)
    }

    async fn is_container_running(&self, container_id: &str) -> Result<bool, DriverError> {
        let client = self.client().await?;
        match client.inspect_container(container_id, None).await {
            Ok(info) => Ok(info
                .state
                .and_then(|s| s.status)
                .map(|s| s == bollard::models::ContainerStateStatusEnum::RUNNING)
                .unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => {
                error!(container_id, error = %e, "failed to inspect container");
                Ok(false)
            }
        }
    }
}
