use std::env;

use crate::error::ConfigError;

/// What the Resolver does at rung 4 admission when `max_ship_num` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Reject,
    Wait,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(OverflowPolicy::Reject),
            "wait" => Ok(OverflowPolicy::Wait),
            other => Err(ConfigError::Conversion {
                key: "behavior_after_max_ship",
                message: format!("expected 'reject' or 'wait', got '{other}'"),
            }),
        }
    }
}

/// One of the six container-runtime selectors from the original's
/// `container_driver` setting. `Containerd` parses successfully but every
/// attempt to build it fails with `DriverNotImplemented`, matching the
/// original's "(not yet implemented)" comment rather than silently
/// substituting another driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Docker,
    DockerHost,
    Podman,
    PodmanHost,
    Kubernetes,
    Containerd,
}

impl std::str::FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(DriverKind::Docker),
            "docker-host" => Ok(DriverKind::DockerHost),
            "podman" => Ok(DriverKind::Podman),
            "podman-host" => Ok(DriverKind::PodmanHost),
            "kubernetes" => Ok(DriverKind::Kubernetes),
            "containerd" => Ok(DriverKind::Containerd),
            other => Err(ConfigError::UnknownDriver(other.to_string())),
        }
    }
}

/// Process-wide configuration, read once at startup. Field-for-field
/// equivalent of the original's `app/config.py` `Settings`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub debug: bool,

    pub max_ship_num: usize,
    pub behavior_after_max_ship: OverflowPolicy,

    pub access_token: String,

    /// `memory://`, `redb:///path/to/file`, or a `postgres://` URL.
    pub store_dsn: String,

    pub container_driver: DriverKind,
    pub kube_namespace: String,
    pub kube_config_path: Option<String>,
    pub kube_image_pull_policy: String,
    pub kube_pvc_size: String,
    pub kube_storage_class: Option<String>,

    pub docker_image: String,
    pub docker_network: String,
    pub ship_container_port: u16,

    pub default_ship_ttl: i64,
    pub default_ship_cpus: f64,
    pub default_ship_memory: String,

    pub ship_health_check_timeout_secs: u64,
    pub ship_health_check_interval_secs: u64,
    pub reconciler_interval_secs: u64,

    pub max_upload_size_bytes: u64,
    pub ship_data_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "0.0.0.0".into(),
            port: 8156,
            debug: false,
            max_ship_num: 10,
            behavior_after_max_ship: OverflowPolicy::Wait,
            access_token: "secret-token".into(),
            store_dsn: "memory://".into(),
            container_driver: DriverKind::Docker,
            kube_namespace: "default".into(),
            kube_config_path: None,
            kube_image_pull_policy: "IfNotPresent".into(),
            kube_pvc_size: "1Gi".into(),
            kube_storage_class: None,
            docker_image: "ship:latest".into(),
            docker_network: "shipyard".into(),
            ship_container_port: 8123,
            default_ship_ttl: 3600,
            default_ship_cpus: 1.0,
            default_ship_memory: "512m".into(),
            ship_health_check_timeout_secs: 60,
            ship_health_check_interval_secs: 2,
            reconciler_interval_secs: 60,
            max_upload_size_bytes: 100 * 1024 * 1024,
            ship_data_dir: "~/ship_data".into(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::Conversion {
            key,
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Loads configuration from `HARBOR_*` environment variables, falling
    /// back to the defaults above for anything unset. Values present but
    /// malformed are a hard startup error, not a silently ignored default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Settings::default();

        let behavior_after_max_ship = match env::var("HARBOR_BEHAVIOR_AFTER_MAX_SHIP") {
            Ok(raw) => raw.parse()?,
            Err(_) => d.behavior_after_max_ship,
        };
        let container_driver = match env::var("HARBOR_CONTAINER_DRIVER") {
            Ok(raw) => raw.parse()?,
            Err(_) => d.container_driver,
        };

        Ok(Settings {
            host: env_string("HARBOR_HOST", &d.host),
            port: env_parsed("HARBOR_PORT", d.port)?,
            debug: env_parsed("HARBOR_DEBUG", d.debug)?,
            max_ship_num: env_parsed("HARBOR_MAX_SHIP_NUM", d.max_ship_num)?,
            behavior_after_max_ship,
            access_token: env_string("HARBOR_ACCESS_TOKEN", &d.access_token),
            store_dsn: env_string("HARBOR_STORE_DSN", &d.store_dsn),
            container_driver,
            kube_namespace: env_string("HARBOR_KUBE_NAMESPACE", &d.kube_namespace),
            kube_config_path: env_opt_string("HARBOR_KUBE_CONFIG_PATH"),
            kube_image_pull_policy: env_string(
                "HARBOR_KUBE_IMAGE_PULL_POLICY",
                &d.kube_image_pull_policy,
            ),
            kube_pvc_size: env_string("HARBOR_KUBE_PVC_SIZE", &d.kube_pvc_size),
            kube_storage_class: env_opt_string("HARBOR_KUBE_STORAGE_CLASS"),
            docker_image: env_string("HARBOR_DOCKER_IMAGE", &d.docker_image),
            docker_network: env_string("HARBOR_DOCKER_NETWORK", &d.docker_network),
            ship_container_port: env_parsed("HARBOR_SHIP_CONTAINER_PORT", d.ship_container_port)?,
            default_ship_ttl: env_parsed("HARBOR_DEFAULT_SHIP_TTL", d.default_ship_ttl)?,
            default_ship_cpus: env_parsed("HARBOR_DEFAULT_SHIP_CPUS", d.default_ship_cpus)?,
            default_ship_memory: env_string("HARBOR_DEFAULT_SHIP_MEMORY", &d.default_ship_memory),
            ship_health_check_timeout_secs: env_parsed(
                "HARBOR_SHIP_HEALTH_CHECK_TIMEOUT",
                d.ship_health_check_timeout_secs,
            )?,
            ship_health_check_interval_secs: env_parsed(
                "HARBOR_SHIP_HEALTH_CHECK_INTERVAL",
                d.ship_health_check_interval_secs,
            )?,
            reconciler_interval_secs: env_parsed(
                "HARBOR_RECONCILER_INTERVAL",
                d.reconciler_interval_secs,
            )?,
            max_upload_size_bytes: env_parsed("HARBOR_MAX_UPLOAD_SIZE", d.max_upload_size_bytes)?,
            ship_data_dir: env_string("HARBOR_SHIP_DATA_DIR", &d.ship_data_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_service() {
        let d = Settings::default();
        assert_eq!(d.port, 8156);
        assert_eq!(d.max_ship_num, 10);
        assert_eq!(d.ship_health_check_interval_secs, 2);
        assert_eq!(d.ship_health_check_timeout_secs, 60);
    }

    #[test]
    fn overflow_policy_parses_known_values_only() {
        assert_eq!("wait".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Wait);
        assert_eq!("reject".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Reject);
        assert!("sometimes".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn driver_kind_parses_all_six_selectors() {
        for s in ["docker", "docker-host", "podman", "podman-host", "kubernetes", "containerd"] {
            assert!(s.parse::<DriverKind>().is_ok(), "{s} should parse");
        }
        assert!("rkt".parse::<DriverKind>().is_err());
    }
}
