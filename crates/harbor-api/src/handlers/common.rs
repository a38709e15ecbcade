use axum::http::HeaderMap;
use harbor_domain::SessionId;

use crate::error::ApiError;

pub const SESSION_HEADER: &str = "X-SESSION-ID";

/// Every route that acts on behalf of a session reads its id from
/// `X-SESSION-ID` rather than a path or query parameter, per spec.md §6.
pub fn session_id_from_headers(headers: &HeaderMap) -> Result<SessionId, ApiError> {
    let raw = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unprocessable(format!("missing {SESSION_HEADER} header")))?;
    SessionId::new(raw).map_err(ApiError::from)
}
