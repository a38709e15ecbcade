use chrono::{DateTime, Utc};
use harbor_domain::{
    Binding, BindingId, ExecKind, ExecutionRecord, ExecutionRecordId, Ship, ShipId, ShipStatus,
    SessionId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::filter::ExecutionHistoryFilter;
use crate::store::StateStore;

const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS ships (
    id               TEXT PRIMARY KEY,
    status           TEXT NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL,
    container_handle TEXT,
    address          TEXT,
    ttl              BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS bindings (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL,
    ship_id       TEXT NOT NULL REFERENCES ships(id) ON DELETE CASCADE,
    created_at    TIMESTAMPTZ NOT NULL,
    last_activity TIMESTAMPTZ NOT NULL,
    expires_at    TIMESTAMPTZ NOT NULL,
    initial_ttl   BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS bindings_session_idx ON bindings(session_id);
CREATE INDEX IF NOT EXISTS bindings_ship_idx ON bindings(ship_id);

CREATE TABLE IF NOT EXISTS execution_records (
    id                 TEXT PRIMARY KEY,
    session_id         TEXT NOT NULL,
    kind               TEXT NOT NULL,
    code_or_command    TEXT NOT NULL,
    success            BOOLEAN NOT NULL,
    execution_time_ms  BIGINT,
    created_at         TIMESTAMPTZ NOT NULL,
    description        TEXT,
    tags               TEXT,
    notes              TEXT
);
CREATE INDEX IF NOT EXISTS execution_records_session_idx ON execution_records(session_id);
"#;

/// `sqlx`/Postgres implementation of [`StateStore`] for a shared deployment
/// (`postgres://` store DSN), the idiomatic analogue of the original's
/// arbitrary SQLAlchemy `database_url`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let store = PostgresStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATIONS)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ShipRow {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    container_handle: Option<String>,
    address: Option<String>,
    ttl: i64,
}

impl TryFrom<ShipRow> for Ship {
    type Error = StoreError;

    fn try_from(r: ShipRow) -> Result<Self, StoreError> {
        let status = match r.status.as_str() {
            "creating" => ShipStatus::Creating,
            "running" => ShipStatus::Running,
            "stopped" => ShipStatus::Stopped,
            other => return Err(StoreError::Internal(format!("unknown ship status '{other}'"))),
        };
        Ok(Ship {
            id: ShipId::new(r.id),
            status,
            created_at: r.created_at,
            updated_at: r.updated_at,
            container_handle: r.container_handle,
            address: r.address,
            ttl: r.ttl,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BindingRow {
    id: String,
    session_id: String,
    ship_id: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    initial_ttl: i64,
}

impl TryFrom<BindingRow> for Binding {
    type Error = StoreError;

    fn try_from(r: BindingRow) -> Result<Self, StoreError> {
        Ok(Binding {
            id: BindingId(r.id),
            session_id: SessionId::new(r.session_id).map_err(|e| StoreError::Internal(e.to_string()))?,
            ship_id: ShipId::new(r.ship_id),
            created_at: r.created_at,
            last_activity: r.last_activity,
            expires_at: r.expires_at,
            initial_ttl: r.initial_ttl,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRecordRow {
    id: String,
    session_id: String,
    kind: String,
    code_or_command: String,
    success: bool,
    execution_time_ms: Option<i64>,
    created_at: DateTime<Utc>,
    description: Option<String>,
    tags: Option<String>,
    notes: Option<String>,
}

impl TryFrom<ExecutionRecordRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(r: ExecutionRecordRow) -> Result<Self, StoreError> {
        let kind = match r.kind.as_str() {
            "python" => ExecKind::Python,
            "shell" => ExecKind::Shell,
            other => return Err(StoreError::Internal(format!("unknown exec kind '{other}'"))),
        };
        Ok(ExecutionRecord {
            id: ExecutionRecordId(r.id),
            session_id: SessionId::new(r.session_id).map_err(|e| StoreError::Internal(e.to_string()))?,
            kind,
            code_or_command: r.code_or_command,
            success: r.success,
            execution_time_ms: r.execution_time_ms,
            created_at: r.created_at,
            description: r.description,
            tags: r.tags,
            notes: r.notes,
        })
    }
}

fn internal(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait::async_trait]
impl StateStore for PostgresStore {
    async fn get_ship(&self, id: &ShipId) -> Result<Option<Ship>, StoreError> {
        let row: Option<ShipRow> = sqlx::query_as("SELECT * FROM ships WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(Ship::try_from).transpose()
    }

    async fn upsert_ship(&self, ship: &Ship) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ships (id, status, created_at, updated_at, container_handle, address, ttl)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
               status = EXCLUDED.status,
               updated_at = EXCLUDED.updated_at,
               container_handle = EXCLUDED.container_handle,
               address = EXCLUDED.address,
               ttl = EXCLUDED.ttl",
        )
        .bind(ship.id.as_str())
        .bind(ship.status.to_string())
        .bind(ship.created_at)
        .bind(ship.updated_at)
        .bind(&ship.container_handle)
        .bind(&ship.address)
        .bind(ship.ttl)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn delete_ship(&self, id: &ShipId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ships WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn list_ships(&self) -> Result<Vec<Ship>, StoreError> {
        let rows: Vec<ShipRow> = sqlx::query_as("SELECT * FROM ships")
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(Ship::try_from).collect()
    }

    async fn list_ships_by_status(&self, status: ShipStatus) -> Result<Vec<Ship>, StoreError> {
        let rows: Vec<ShipRow> = sqlx::query_as("SELECT * FROM ships WHERE status = $1")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(Ship::try_from).collect()
    }

    async fn count_running_ships(&self) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ships WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        Ok(count as usize)
    }

    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>, StoreError> {
        let row: Option<BindingRow> = sqlx::query_as("SELECT * FROM bindings WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(Binding::try_from).transpose()
    }

    async fn upsert_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bindings (id, session_id, ship_id, created_at, last_activity, expires_at, initial_ttl)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
               last_activity = EXCLUDED.last_activity,
               expires_at = EXCLUDED.expires_at,
               initial_ttl = EXCLUDED.initial_ttl",
        )
        .bind(binding.id.as_str())
        .bind(binding.session_id.as_str())
        .bind(binding.ship_id.as_str())
        .bind(binding.created_at)
        .bind(binding.last_activity)
        .bind(binding.expires_at)
        .bind(binding.initial_ttl)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn delete_binding(&self, id: &BindingId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM bindings WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn bindings_for_ship(&self, ship_id: &ShipId) -> Result<Vec<Binding>, StoreError> {
        let rows: Vec<BindingRow> = sqlx::query_as("SELECT * FROM bindings WHERE ship_id = $1")
            .bind(ship_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(Binding::try_from).collect()
    }

    async fn bindings_for_session(&self, session_id: &SessionId) -> Result<Vec<Binding>, StoreError> {
        let rows: Vec<BindingRow> = sqlx::query_as("SELECT * FROM bindings WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(Binding::try_from).collect()
    }

    async fn binding_for_session_and_ship(
        &self,
        session_id: &SessionId,
        ship_id: &ShipId,
    ) -> Result<Option<Binding>, StoreError> {
        let row: Option<BindingRow> = sqlx::query_as(
            "SELECT * FROM bindings WHERE session_id = $1 AND ship_id = $2",
        )
        .bind(session_id.as_str())
        .bind(ship_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.map(Binding::try_from).transpose()
    }

    async fn active_binding_for_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let row: Option<(BindingRow, ShipRow)> = sqlx::query_as(
            "SELECT b.id, b.session_id, b.ship_id, b.created_at, b.last_activity, b.expires_at, b.initial_ttl,
                    s.id, s.status, s.created_at, s.updated_at, s.container_handle, s.address, s.ttl
             FROM bindings b JOIN ships s ON s.id = b.ship_id
             WHERE b.session_id = $1 AND b.expires_at > $2 AND s.status = 'running'
             ORDER BY b.last_activity DESC LIMIT 1",
        )
        .bind(session_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        match row {
            Some((b, s)) => Ok(Some((Binding::try_from(b)?, Ship::try_from(s)?))),
            None => Ok(None),
        }
    }

    async fn stopped_binding_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let row: Option<(BindingRow, ShipRow)> = sqlx::query_as(
            "SELECT b.id, b.session_id, b.ship_id, b.created_at, b.last_activity, b.expires_at, b.initial_ttl,
                    s.id, s.status, s.created_at, s.updated_at, s.container_handle, s.address, s.ttl
             FROM bindings b JOIN ships s ON s.id = b.ship_id
             WHERE b.session_id = $1 AND s.status = 'stopped'
             ORDER BY s.updated_at DESC LIMIT 1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        match row {
            Some((b, s)) => Ok(Some((Binding::try_from(b)?, Ship::try_from(s)?))),
            None => Ok(None),
        }
    }

    async fn warm_pool_candidate(&self, now: DateTime<Utc>) -> Result<Option<Ship>, StoreError> {
        let row: Option<ShipRow> = sqlx::query_as(
            "SELECT s.* FROM ships s
             WHERE s.status = 'running'
               AND NOT EXISTS (
                 SELECT 1 FROM bindings b WHERE b.ship_id = s.id AND b.expires_at > $1
               )
             ORDER BY s.created_at ASC LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.map(Ship::try_from).transpose()
    }

    async fn delete_bindings_for_ship(&self, ship_id: &ShipId) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM bindings WHERE ship_id = $1")
            .bind(ship_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_bindings_for_session(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM bindings WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(result.rows_affected() as usize)
    }

    async fn expire_bindings_for_ship(
        &self,
        ship_id: &ShipId,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE bindings SET expires_at = $1 WHERE ship_id = $2 AND expires_at > $1",
        )
        .bind(now)
        .bind(ship_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_session_ids(&self) -> Result<Vec<SessionId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT session_id FROM bindings")
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter()
            .map(|(s,)| SessionId::new(s).map_err(|e| StoreError::Internal(e.to_string())))
            .collect()
    }

    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO execution_records
               (id, session_id, kind, code_or_command, success, execution_time_ms, created_at, description, tags, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id.as_str())
        .bind(record.session_id.as_str())
        .bind(record.kind.to_string())
        .bind(&record.code_or_command)
        .bind(record.success)
        .bind(record.execution_time_ms)
        .bind(record.created_at)
        .bind(&record.description)
        .bind(&record.tags)
        .bind(&record.notes)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_execution_record(
        &self,
        id: &ExecutionRecordId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row: Option<ExecutionRecordRow> =
            sqlx::query_as("SELECT * FROM execution_records WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn update_execution_record_annotations(
        &self,
        id: &ExecutionRecordId,
        description: Option<String>,
        tags: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        sqlx::query(
            "UPDATE execution_records SET
               description = COALESCE($2, description),
               tags = COALESCE($3, tags),
               notes = COALESCE($4, notes)
             WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(&description)
        .bind(&tags)
        .bind(&notes)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        self.get_execution_record(id).await
    }

    async fn list_execution_records(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<(Vec<ExecutionRecord>, usize), StoreError> {
        // Filtering happens in-process; the query surface the composite
        // predicates need (tag substring, presence checks) is small enough
        // that doing it after a single indexed fetch is simpler than
        // building dynamic SQL, and the table is bounded by one session's
        // history.
        let rows: Vec<ExecutionRecordRow> = sqlx::query_as(
            "SELECT * FROM execution_records WHERE session_id = $1 ORDER BY created_at DESC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        let mut matching: Vec<ExecutionRecord> = rows
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        matching.retain(|r| {
            filter.exec_type.map_or(true, |k| k == r.kind)
                && (!filter.success_only || r.success)
                && filter
                    .tag_contains
                    .as_ref()
                    .map_or(true, |needle| r.tags.as_deref().unwrap_or("").contains(needle.as_str()))
                && filter.has_notes.map_or(true, |w| r.notes.is_some() == w)
                && filter.has_description.map_or(true, |w| r.description.is_some() == w)
        });
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn last_execution_record(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let (records, _) = self.list_execution_records(session_id, filter).await?;
        Ok(records.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Option<PostgresStore> {
        let url = std::env::var("TEST_POSTGRES_URL").ok()?;
        Some(PostgresStore::connect(&url).await.unwrap())
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn upsert_and_get_ship_round_trips() {
        let store = test_store().await.unwrap();
        let now = Utc::now();
        let ship = Ship::new_creating(ShipId::generate(), 60, now);
        store.upsert_ship(&ship).await.unwrap();
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.id, ship.id);
        store.delete_ship(&ship.id).await.unwrap();
    }
}
