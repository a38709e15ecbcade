//! Kubernetes orchestrator driver: Ships run as Pods with a PVC-backed
//! workspace, ported from `drivers/kubernetes/{driver,utils}.py`.

use std::time::Duration;

use async_trait::async_trait;
use harbor_domain::{Ship, ShipSpec};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::driver::{ContainerInfo, Driver};
use crate::error::DriverError;
use crate::utils::{normalize_disk_for_k8s, normalize_memory_for_k8s};

pub struct OrchestratorDriver {
    namespace: String,
    image: String,
    container_port: u16,
    image_pull_policy: String,
    pvc_size: String,
    storage_class: Option<String>,
    client: tokio::sync::OnceCell<Client>,
}

impl OrchestratorDriver {
    pub fn new(
        namespace: String,
        image: String,
        container_port: u16,
        image_pull_policy: String,
        pvc_size: String,
        storage_class: Option<String>,
    ) -> Self {
        OrchestratorDriver {
            namespace,
            image,
            container_port,
            image_pull_policy,
            pvc_size,
            storage_class,
            client: tokio::sync::OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client, DriverError> {
        self.client
            .get_or_try_init(|| async {
                Client::try_default()
                    .await
                    .map_err(|e| DriverError::Internal(format!("kube client init failed: {e}")))
            })
            .await
    }

    fn pod_name(ship_id: &str) -> String {
        format!("ship-{ship_id}")
    }

    fn pvc_manifest(&self, ship_id: &str, requested_disk: Option<&str>) -> PersistentVolumeClaim {
        let size = requested_disk
            .map(normalize_disk_for_k8s)
            .unwrap_or_else(|| self.pvc_size.clone());
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": Self::pod_name(ship_id),
                "labels": { "app": "ship", "ship_id": ship_id },
            },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": size } },
                "storageClassName": self.storage_class,
            },
        });
        serde_json::from_value(manifest).expect("static PVC manifest shape is always valid")
    }

    fn pod_manifest(&self, ship: &Ship, spec: Option<&ShipSpec>) -> Pod {
        let name = Self::pod_name(ship.id.as_str());
        let mut resources = json!({});
        if spec.and_then(|s| s.cpus).is_some() || spec.and_then(|s| s.memory.as_ref()).is_some() {
            let mut requests = serde_json::Map::new();
            let mut limits = serde_json::Map::new();
            if let Some(cpus) = spec.and_then(|s| s.cpus) {
                requests.insert("cpu".into(), json!(cpus.to_string()));
                limits.insert("cpu".into(), json!(cpus.to_string()));
            }
            if let Some(memory) = spec.and_then(|s| s.memory.as_deref()) {
                let normalized = normalize_memory_for_k8s(memory);
                requests.insert("memory".into(), json!(normalized.clone()));
                limits.insert("memory".into(), json!(normalized));
            }
            resources = json!({ "requests": requests, "limits": limits });
        }

        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": { "app": "ship", "ship_id": ship.id.as_str() },
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "ship",
                    "image": self.image,
                    "imagePullPolicy": self.image_pull_policy,
                    "ports": [{ "containerPort": self.container_port }],
                    "env": [
                        { "name": "SHIP_ID", "value": ship.id.as_str() },
                        { "name": "TTL", "value": ship.ttl.to_string() },
                        { "name": "PORT", "value": self.container_port.to_string() },
                    ],
                    "resources": resources,
                    "volumeMounts": [
                        { "name": "data", "mountPath": "/home", "subPath": "home" },
                        { "name": "data", "mountPath": "/app/metadata", "subPath": "metadata" },
                    ],
                }],
                "volumes": [{
                    "name": "data",
                    "persistentVolumeClaim": { "claimName": name },
                }],
            },
        });
        serde_json::from_value(manifest).expect("static pod manifest shape is always valid")
    }

    async fn wait_for_pod_ready(
        &self,
        pods: &Api<Pod>,
        pod_name: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                error!(pod_name, "timed out waiting for pod to become ready");
                return None;
            }
            match pods.get(pod_name).await {
                Ok(pod) => {
                    if let Some(status) = &pod.status {
                        let phase = status.phase.as_deref().unwrap_or("");
                        let ip = status.pod_ip.clone();
                        let all_ready = status
                            .container_statuses
                            .as_ref()
                            .map(|cs| cs.iter().all(|c| c.ready))
                            .unwrap_or(false);
                        if phase == "Running" && ip.is_some() && all_ready {
                            return ip;
                        }
                        if phase == "Failed" || phase == "Succeeded" {
                            error!(pod_name, phase, "pod entered a terminal phase");
                            return None;
                        }
                    }
                }
                Err(e) => warn!(pod_name, error = %e, "error polling pod status"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl Driver for OrchestratorDriver {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        self.client().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn create_ship_container(
        &self,
        ship: &Ship,
        spec: Option<&ShipSpec>,
    ) -> Result<ContainerInfo, DriverError> {
        let client = self.client().await?.clone();
        let pods: Api<Pod> = Api::namespaced(client.clone(), &self.namespace);
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client, &self.namespace);

        let name = Self::pod_name(ship.id.as_str());
        let pvc = self.pvc_manifest(ship.id.as_str(), spec.and_then(|s| s.disk.as_deref()));

        match pvcs.create(&PostParams::default(), &pvc).await {
            Ok(_) => debug!(pvc = %name, "created PVC"),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(pvc = %name, "PVC already exists, reusing");
            }
            Err(e) => {
                return Err(DriverError::CreateFailed {
                    ship_id: ship.id.to_string(),
                    message: format!("PVC creation failed: {e}"),
                })
            }
        }

        let pod = self.pod_manifest(ship, spec);
        match pods.create(&PostParams::default(), &pod).await {
            Ok(_) => debug!(pod = %name, "created pod"),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(pod = %name, "pod already exists");
            }
            Err(e) => {
                let _ = pvcs.delete(&name, &DeleteParams::default()).await;
                return Err(DriverError::CreateFailed {
                    ship_id: ship.id.to_string(),
                    message: format!("pod creation failed: {e}"),
                });
            }
        }

        let ip = self
            .wait_for_pod_ready(&pods, &name, Duration::from_secs(60), Duration::from_secs(2))
            .await;

        let Some(ip) = ip else {
            let _ = pods.delete(&name, &DeleteParams::default()).await;
            let _ = pvcs.delete(&name, &DeleteParams::default()).await;
            return Err(DriverError::AddressUnavailable {
                container_id: name,
                ship_id: ship.id.to_string(),
                details: Some("pod did not get an IP within the timeout".to_string()),
            });
        };

        Ok(ContainerInfo { container_id: name, ip_address: Some(ip), status: "running".to_string() })
    }

    async fn stop_ship_container(&self, container_id: &str) -> Result<bool, DriverError> {
        let client = self.client().await?.clone();
        let pods: Api<Pod> = Api::namespaced(client.clone(), &self.namespace);
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client, &self.namespace);

        let pod_ok = match pods.delete(container_id, &DeleteParams::default()).await {
            Ok(_) => true,
            Err(kube::Error::Api(e)) if e.code == 404 => true,
            Err(e) => {
                error!(container_id, error = %e, "failed to delete pod");
                false
            }
        };

        // Stop preserves the PVC for a later restore — only `delete_ship_data`
        // removes it.
        Ok(pod_ok)
    }

    async fn delete_ship_data(&self, container_id: &str) -> Result<bool, DriverError> {
        let client = self.client().await?.clone();
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client, &self.namespace);
        match pvcs.delete(container_id, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(true),
            Err(e) => {
                error!(container_id, error = %e, "failed to delete PVC");
                Ok(false)
            }
        }
    }

    fn ship_data_exists(&self, _ship_id: &str) -> bool {
        // Existence can only be confirmed with an API call, which this trait
        // method can't make synchronously; assume data might exist and let
        // the restore path's own PVC lookup be the authoritative check.
        true
    }

    async fn get_container_logs(&self, container_id: &str) -> Result<String, DriverError> {
        let client = self.client().await?.clone();
        let pods: Api<Pod> = Api::namespaced(client, &self.namespace);
        let params = kube::api::LogParams { tail_lines: Some(1000), ..Default::default() };
        match pods.logs(container_id, &params).await {
            Ok(logs) => Ok(logs),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(String::new()),
            Err(e) => {
                warn!(container_id, error = %e, "failed to fetch pod logs");
                Ok(String::new())
            }
        }
    }

    async fn is_container_running(&self, container_id: &str) -> Result<bool, DriverError> {
        let client = self.client().await?.clone();
        let pods: Api<Pod> = Api::namespaced(client, &self.namespace);
        match pods.get(container_id).await {
            Ok(pod) => Ok(pod.status.and_then(|s| s.phase).as_deref() == Some("Running")),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => {
                error!(container_id, error = %e, "failed to get pod status");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use harbor_domain::ShipId;

    fn driver() -> OrchestratorDriver {
        OrchestratorDriver::new(
            "default".to_string(),
            "harbor-ship:latest".to_string(),
            8080,
            "IfNotPresent".to_string(),
            "1Gi".to_string(),
            None,
        )
    }

    #[test]
    fn pod_manifest_mounts_home_and_metadata_subpaths() {
        let d = driver();
        let ship = Ship::new_creating(ShipId::generate(), 60, Utc::now());
        let pod = d.pod_manifest(&ship, None);
        let mounts = &pod.spec.unwrap().containers[0].volume_mounts;
        let mounts = mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/home"));
        assert!(mounts.iter().any(|m| m.mount_path == "/app/metadata"));
    }

    #[test]
    fn pod_manifest_normalizes_docker_style_memory() {
        let d = driver();
        let ship = Ship::new_creating(ShipId::generate(), 60, Utc::now());
        let spec = ShipSpec { cpus: None, memory: Some("512m".to_string()), disk: None };
        let pod = d.pod_manifest(&ship, Some(&spec));
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(limits.get("memory").unwrap().0, "512Mi");
    }
}
