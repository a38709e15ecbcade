use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ship not found: {0}")]
    ShipNotFound(String),

    #[error("binding not found: {0}")]
    BindingNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
