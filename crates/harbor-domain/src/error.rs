use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("ttl must be a positive number of seconds, got {0}")]
    InvalidTtl(i64),

    #[error("session id must not be empty")]
    EmptySessionId,

    #[error("invalid ship id: {0}")]
    InvalidShipId(String),
}
