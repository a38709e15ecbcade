use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_domain::{Binding, BindingId, ExecutionRecord, ExecutionRecordId, Ship, ShipId, ShipStatus, SessionId};

use crate::error::StoreError;
use crate::filter::ExecutionHistoryFilter;

/// Durable mapping of Ships, Session→Ship bindings, and execution-history
/// records. Every read and write in the core goes through this trait; no
/// other component mutates rows directly. Implementations normalize every
/// timestamp they return to UTC before handing it back — naive timestamps
/// read from a backend that doesn't carry a timezone must be stamped UTC,
/// never compared as-is.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── Ships ────────────────────────────────────────────────────────────
    async fn get_ship(&self, id: &ShipId) -> Result<Option<Ship>, StoreError>;
    async fn upsert_ship(&self, ship: &Ship) -> Result<(), StoreError>;
    /// Permanent delete: removes the row. Bindings must be deleted separately.
    async fn delete_ship(&self, id: &ShipId) -> Result<(), StoreError>;
    async fn list_ships(&self) -> Result<Vec<Ship>, StoreError>;
    async fn list_ships_by_status(&self, status: ShipStatus) -> Result<Vec<Ship>, StoreError>;
    async fn count_running_ships(&self) -> Result<usize, StoreError>;

    // ── Bindings ─────────────────────────────────────────────────────────
    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>, StoreError>;
    async fn upsert_binding(&self, binding: &Binding) -> Result<(), StoreError>;
    async fn delete_binding(&self, id: &BindingId) -> Result<(), StoreError>;
    async fn bindings_for_ship(&self, ship_id: &ShipId) -> Result<Vec<Binding>, StoreError>;
    async fn bindings_for_session(&self, session_id: &SessionId) -> Result<Vec<Binding>, StoreError>;
    async fn binding_for_session_and_ship(
        &self,
        session_id: &SessionId,
        ship_id: &ShipId,
    ) -> Result<Option<Binding>, StoreError>;

    /// Resolver rung 1: the single Running Ship bound to `session_id`, most
    /// recently updated first if more than one somehow exists.
    async fn active_binding_for_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(Binding, Ship)>, StoreError>;

    /// Resolver rung 2: the most recently updated Stopped Ship this session
    /// owns (an inactive binding pointing at a Stopped ship).
    async fn stopped_binding_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(Binding, Ship)>, StoreError>;

    /// Resolver rung 3: a Running Ship with zero active bindings, oldest first.
    async fn warm_pool_candidate(&self, now: DateTime<Utc>) -> Result<Option<Ship>, StoreError>;

    async fn delete_bindings_for_ship(&self, ship_id: &ShipId) -> Result<usize, StoreError>;
    async fn delete_bindings_for_session(&self, session_id: &SessionId) -> Result<usize, StoreError>;

    /// Sets expiry ← now for every currently active binding of this Ship.
    async fn expire_bindings_for_ship(
        &self,
        ship_id: &ShipId,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Distinct session ids that currently have any binding, for the
    /// dashboard-facing `/sessions` listing.
    async fn list_session_ids(&self) -> Result<Vec<SessionId>, StoreError>;

    // ── Execution records ───────────────────────────────────────────────
    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError>;
    async fn get_execution_record(
        &self,
        id: &ExecutionRecordId,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    async fn update_execution_record_annotations(
        &self,
        id: &ExecutionRecordId,
        description: Option<String>,
        tags: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    async fn list_execution_records(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<(Vec<ExecutionRecord>, usize), StoreError>;

    async fn last_execution_record(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<Option<ExecutionRecord>, StoreError>;
}
