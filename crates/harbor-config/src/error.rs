use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Conversion { key: &'static str, message: String },

    #[error("unknown container driver '{0}'; expected one of docker, docker-host, podman, podman-host, kubernetes, containerd")]
    UnknownDriver(String),

    #[error("driver '{0}' is not implemented")]
    DriverNotImplemented(&'static str),
}
