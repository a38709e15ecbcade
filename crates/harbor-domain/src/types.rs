use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShipId(pub String);

impl ShipId {
    /// Mints a fresh, opaque ship id. Assigned once, at creation, by the Resolver.
    pub fn generate() -> Self {
        ShipId(Uuid::new_v4().to_string())
    }

    pub fn new(s: impl Into<String>) -> Self {
        ShipId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, client-supplied. Never generated by the Harbor itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(DomainError::EmptySessionId);
        }
        Ok(SessionId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingId(pub String);

impl BindingId {
    pub fn generate() -> Self {
        BindingId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionRecordId(pub String);

impl ExecutionRecordId {
    pub fn generate() -> Self {
        ExecutionRecordId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Ship ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStatus {
    Creating,
    Running,
    Stopped,
}

impl std::fmt::Display for ShipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShipStatus::Creating => write!(f, "creating"),
            ShipStatus::Running => write!(f, "running"),
            ShipStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One sandbox container. See spec §3 for the lifecycle and the Running ⟺
/// (handle, address) invariant, which `Store` implementations must enforce at
/// every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    pub id: ShipId,
    pub status: ShipStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub container_handle: Option<String>,
    /// Either an internal IP (implicit default port) or a `host:port` pair.
    /// The Proxy distinguishes the two by testing for a colon.
    pub address: Option<String>,
    /// Informational only — the authoritative expiry lives on the Bindings.
    pub ttl: i64,
}

impl Ship {
    pub fn new_creating(id: ShipId, ttl: i64, now: DateTime<Utc>) -> Self {
        Ship {
            id,
            status: ShipStatus::Creating,
            created_at: now,
            updated_at: now,
            container_handle: None,
            address: None,
            ttl,
        }
    }

    pub fn mark_running(&mut self, container_handle: String, address: String, now: DateTime<Utc>) {
        self.container_handle = Some(container_handle);
        self.address = Some(address);
        self.status = ShipStatus::Running;
        self.updated_at = now;
    }

    /// Soft stop: clears the handle/address, preserving the row and any
    /// on-disk data the Driver mounted for later restore.
    pub fn mark_stopped(&mut self, now: DateTime<Utc>) {
        self.status = ShipStatus::Stopped;
        self.container_handle = None;
        self.address = None;
        self.updated_at = now;
    }
}

// ── Binding ──────────────────────────────────────────────────────────────────

/// One (session_id, ship_id) row. See spec §3 for the 1:1-binding invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub id: BindingId,
    pub session_id: SessionId,
    pub ship_id: ShipId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The refresh quantum: every refresh sets `expires_at` to now + this.
    pub initial_ttl: i64,
}

impl Binding {
    pub fn new(session_id: SessionId, ship_id: ShipId, initial_ttl: i64, now: DateTime<Utc>) -> Self {
        Binding {
            id: BindingId::generate(),
            session_id,
            ship_id,
            created_at: now,
            last_activity: now,
            expires_at: now + chrono::Duration::seconds(initial_ttl),
            initial_ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Refreshes `expires_at` to now + `initial_ttl`, per spec §4.4 "refresh on operation".
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.expires_at = now + chrono::Duration::seconds(self.initial_ttl);
    }

    pub fn extend(&mut self, additional_ttl: i64, now: DateTime<Utc>) {
        self.initial_ttl += additional_ttl;
        self.expires_at = self.expires_at + chrono::Duration::seconds(additional_ttl);
        self.last_activity = now;
    }

    pub fn expire_now(&mut self, now: DateTime<Utc>) {
        self.expires_at = now;
    }
}

// ── ExecutionRecord ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecKind {
    Python,
    Shell,
}

impl std::fmt::Display for ExecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecKind::Python => write!(f, "python"),
            ExecKind::Shell => write!(f, "shell"),
        }
    }
}

/// Append-only audit row written after each successful Proxy exec forward.
/// Never updated except for the three annotation fields, set post-hoc by
/// clients building a skill library out of past executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionRecordId,
    pub session_id: SessionId,
    pub kind: ExecKind,
    /// The submitted python code or shell command.
    pub code_or_command: String,
    pub success: bool,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    /// Comma-separated, matching the original's on-disk representation.
    pub tags: Option<String>,
    pub notes: Option<String>,
}

impl ExecutionRecord {
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|t| t.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

// ── Request DTOs ─────────────────────────────────────────────────────────────

/// Spec for a new Ship's resource allocation. Unknown fields are rejected —
/// the original's Pydantic models use `extra="forbid"` for exactly this body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipSpec {
    pub cpus: Option<f64>,
    pub memory: Option<String>,
    pub disk: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateShipRequest {
    pub ttl: i64,
    #[serde(default)]
    pub spec: Option<ShipSpec>,
    #[serde(default)]
    pub force_create: bool,
}

impl CreateShipRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.ttl <= 0 {
            return Err(DomainError::InvalidTtl(self.ttl));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_refresh_moves_expiry_forward() {
        let now = Utc::now();
        let mut b = Binding::new(
            SessionId::new("s1").unwrap(),
            ShipId::generate(),
            60,
            now,
        );
        assert_eq!(b.expires_at, now + chrono::Duration::seconds(60));
        let later = now + chrono::Duration::seconds(30);
        b.refresh(later);
        assert_eq!(b.expires_at, later + chrono::Duration::seconds(60));
    }

    #[test]
    fn binding_is_active_iff_expiry_in_future() {
        let now = Utc::now();
        let mut b = Binding::new(SessionId::new("s1").unwrap(), ShipId::generate(), 60, now);
        assert!(b.is_active(now));
        b.expire_now(now);
        assert!(!b.is_active(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn create_ship_request_rejects_non_positive_ttl() {
        let req = CreateShipRequest { ttl: 0, spec: None, force_create: false };
        assert!(matches!(req.validate(), Err(DomainError::InvalidTtl(0))));
    }

    #[test]
    fn empty_session_id_rejected() {
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("   ").is_err());
    }

    #[test]
    fn ship_spec_rejects_unknown_fields() {
        let err = serde_json::from_str::<ShipSpec>(r#"{"cpus":1.0,"bogus":true}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn execution_record_tag_list_splits_and_trims() {
        let rec = ExecutionRecord {
            id: ExecutionRecordId::generate(),
            session_id: SessionId::new("s1").unwrap(),
            kind: ExecKind::Shell,
            code_or_command: "echo hi".into(),
            success: true,
            execution_time_ms: Some(5),
            created_at: Utc::now(),
            description: None,
            tags: Some(" a, b ,c".into()),
            notes: None,
        };
        assert_eq!(rec.tag_list(), vec!["a", "b", "c"]);
    }
}
