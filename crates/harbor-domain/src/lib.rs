mod error;
mod types;

pub use error::DomainError;
pub use types::*;
