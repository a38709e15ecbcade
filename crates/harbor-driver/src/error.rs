use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to create container for ship {ship_id}: {message}")]
    CreateFailed { ship_id: String, message: String },

    #[error("failed to obtain an address for container {container_id} (ship {ship_id}){}", details.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    AddressUnavailable {
        container_id: String,
        ship_id: String,
        details: Option<String>,
    },

    #[error("driver '{0}' is not implemented")]
    NotImplemented(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal driver error: {0}")]
    Internal(String),
}
