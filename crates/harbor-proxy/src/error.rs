use thiserror::Error;

/// Mirrors the failure taxonomy `service.py`'s `execute_operation`/
/// `upload_file`/`download_file` raise, minus the HTTP-status mapping (that
/// lives in the API layer).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Store(#[from] harbor_store::StoreError),

    #[error(transparent)]
    Scheduler(#[from] harbor_scheduler::SchedulerError),

    #[error("ship {0} not found")]
    ShipNotFound(String),

    #[error("ship {0} is not running")]
    ShipNotRunning(String),

    #[error("ship {0} has no address")]
    NoAddress(String),

    #[error("session {session_id} has no access to ship {ship_id}")]
    AccessDenied { session_id: String, ship_id: String },

    #[error("downstream request failed with status {status}: {body}")]
    Forward { status: u16, body: String },

    #[error("downstream request error: {0}")]
    Transport(#[from] reqwest::Error),
}
