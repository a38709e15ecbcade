use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Taxonomy per spec.md §7: client errors surface verbatim with their 4xx,
/// transient infra errors and anything else fall back to 500 rather than
/// leaking internals.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::UNPROCESSABLE_ENTITY, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::FORBIDDEN, message: msg.into() }
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::PAYLOAD_TOO_LARGE, message: msg.into() }
    }

    pub fn request_timeout(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::REQUEST_TIMEOUT, message: msg.into() }
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<harbor_store::StoreError> for ApiError {
    fn from(e: harbor_store::StoreError) -> Self {
        match e {
            harbor_store::StoreError::ShipNotFound(_) | harbor_store::StoreError::BindingNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<harbor_domain::DomainError> for ApiError {
    fn from(e: harbor_domain::DomainError) -> Self {
        ApiError::unprocessable(e.to_string())
    }
}

/// §7: health timeout surfaces as 408 with the Ship already cleaned up;
/// capacity errors as a 5xx with an explicit message; everything else
/// (driver/store/scheduler trouble encountered mid-resolve) as 500.
impl From<harbor_resolver::ResolverError> for ApiError {
    fn from(e: harbor_resolver::ResolverError) -> Self {
        match e {
            harbor_resolver::ResolverError::HealthTimeout => ApiError::request_timeout(e.to_string()),
            harbor_resolver::ResolverError::NoAddress => ApiError::request_timeout(e.to_string()),
            harbor_resolver::ResolverError::CapacityExceeded { .. }
            | harbor_resolver::ResolverError::CapacityWaitTimeout { .. } => {
                ApiError::capacity_exceeded(e.to_string())
            }
            _ => ApiError::internal(e.to_string()),
        }
    }
}

/// §7: a forward failure (downstream non-2xx, bad address, dead ship) is a
/// 400 to the caller per the `/ship/{id}/exec` contract; access/not-found
/// keep their own more specific codes.
impl From<harbor_proxy::ProxyError> for ApiError {
    fn from(e: harbor_proxy::ProxyError) -> Self {
        match e {
            harbor_proxy::ProxyError::ShipNotFound(_) => ApiError::not_found(e.to_string()),
            harbor_proxy::ProxyError::AccessDenied { .. } => ApiError::forbidden(e.to_string()),
            harbor_proxy::ProxyError::ShipNotRunning(_)
            | harbor_proxy::ProxyError::NoAddress(_)
            | harbor_proxy::ProxyError::Forward { .. }
            | harbor_proxy::ProxyError::Transport(_) => ApiError::bad_request(e.to_string()),
            harbor_proxy::ProxyError::Store(_) | harbor_proxy::ProxyError::Scheduler(_) => {
                ApiError::internal(e.to_string())
            }
        }
    }
}
