use std::path::PathBuf;
use std::sync::Arc;

use harbor_config::{DriverKind, Settings};

use crate::docker::{AddressMode, DockerDriver};
use crate::driver::Driver;
use crate::error::DriverError;
use crate::local::LocalDriver;
use crate::orchestrator::OrchestratorDriver;

/// Builds the [`Driver`] selected by `settings.container_driver`. Podman
/// variants reuse [`DockerDriver`] against Podman's Docker-API-compatible
/// socket rather than a separate implementation — structurally identical to
/// the Docker ones, per the original's own driver factory comments.
pub fn build_driver(settings: &Settings) -> Result<Arc<dyn Driver>, DriverError> {
    let ship_data_dir = PathBuf::from(shellexpand_home(&settings.ship_data_dir));

    let driver: Arc<dyn Driver> = match settings.container_driver {
        DriverKind::Docker => Arc::new(DockerDriver::new(
            None,
            settings.docker_image.clone(),
            Some(settings.docker_network.clone()),
            settings.ship_container_port,
            ship_data_dir,
            AddressMode::Internal,
        )),
        DriverKind::DockerHost => Arc::new(DockerDriver::new(
            None,
            settings.docker_image.clone(),
            Some(settings.docker_network.clone()),
            settings.ship_container_port,
            ship_data_dir,
            AddressMode::HostMapped,
        )),
        DriverKind::Podman => Arc::new(DockerDriver::new(
            Some("/run/podman/podman.sock".to_string()),
            settings.docker_image.clone(),
            Some(settings.docker_network.clone()),
            settings.ship_container_port,
            ship_data_dir,
            AddressMode::Internal,
        )),
        DriverKind::PodmanHost => Arc::new(DockerDriver::new(
            Some("/run/podman/podman.sock".to_string()),
            settings.docker_image.clone(),
            Some(settings.docker_network.clone()),
            settings.ship_container_port,
            ship_data_dir,
            AddressMode::HostMapped,
        )),
        DriverKind::Kubernetes => Arc::new(OrchestratorDriver::new(
            settings.kube_namespace.clone(),
            settings.docker_image.clone(),
            settings.ship_container_port,
            settings.kube_image_pull_policy.clone(),
            settings.kube_pvc_size.clone(),
            settings.kube_storage_class.clone(),
        )),
        DriverKind::Containerd => return Err(DriverError::NotImplemented("containerd")),
    };

    Ok(driver)
}

/// Builds a [`LocalDriver`], bypassing `settings.container_driver` entirely —
/// used by `harbor-server` only behind an explicit test/demo flag.
pub fn build_local_driver() -> Arc<dyn Driver> {
    Arc::new(LocalDriver::new())
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containerd_selector_builds_a_not_implemented_error() {
        let mut settings = Settings::default();
        settings.container_driver = DriverKind::Containerd;
        let err = build_driver(&settings).unwrap_err();
        assert!(matches!(err, DriverError::NotImplemented("containerd")));
    }

    #[test]
    fn docker_and_docker_host_both_build() {
        let mut settings = Settings::default();
        settings.container_driver = DriverKind::Docker;
        assert!(build_driver(&settings).is_ok());
        settings.container_driver = DriverKind::DockerHost;
        assert!(build_driver(&settings).is_ok());
    }
}
