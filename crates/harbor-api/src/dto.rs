use chrono::{DateTime, Utc};
use harbor_domain::{Binding, ExecutionRecord, Ship};
use serde::Serialize;

/// Response shape for every route returning a Ship. `expires_at` is
/// computed, not stored — spec.md §3 defines a Ship's expiry as the max
/// expiry across its active bindings, not a column on the row.
#[derive(Debug, Clone, Serialize)]
pub struct ShipView {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub address: Option<String>,
    pub ttl: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShipView {
    pub fn from_ship_and_bindings(ship: &Ship, bindings: &[Binding], now: DateTime<Utc>) -> Self {
        let expires_at = bindings.iter().filter(|b| b.is_active(now)).map(|b| b.expires_at).max();
        ShipView {
            id: ship.id.to_string(),
            status: ship.status.to_string(),
            created_at: ship.created_at,
            updated_at: ship.updated_at,
            address: ship.address.clone(),
            ttl: ship.ttl,
            expires_at,
        }
    }
}

/// Response shape for `/sessions*` routes — a (session, ship) binding
/// annotated with `is_active`, which naive timestamp comparisons get wrong
/// if not normalized to UTC first (spec.md §9).
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub ship_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl SessionView {
    pub fn from_binding(binding: &Binding, now: DateTime<Utc>) -> Self {
        SessionView {
            session_id: binding.session_id.to_string(),
            ship_id: binding.ship_id.to_string(),
            created_at: binding.created_at,
            last_activity: binding.last_activity,
            expires_at: binding.expires_at,
            is_active: binding.is_active(now),
        }
    }
}

/// History entry view — tags exposed as a list for clients, even though the
/// Store persists them as comma-separated text (spec.md §3).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntryView {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub code_or_command: String,
    pub success: bool,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl From<&ExecutionRecord> for HistoryEntryView {
    fn from(r: &ExecutionRecord) -> Self {
        HistoryEntryView {
            id: r.id.to_string(),
            session_id: r.session_id.to_string(),
            kind: r.kind.to_string(),
            code_or_command: r.code_or_command.clone(),
            success: r.success,
            execution_time_ms: r.execution_time_ms,
            created_at: r.created_at,
            description: r.description.clone(),
            tags: r.tag_list().into_iter().map(str::to_string).collect(),
            notes: r.notes.clone(),
        }
    }
}
