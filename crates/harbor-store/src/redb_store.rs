use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_domain::{
    Binding, BindingId, ExecutionRecord, ExecutionRecordId, Ship, ShipId, ShipStatus, SessionId,
};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::filter::ExecutionHistoryFilter;
use crate::store::StateStore;

const SHIPS: TableDefinition<&str, &str> = TableDefinition::new("ships");
const BINDINGS: TableDefinition<&str, &str> = TableDefinition::new("bindings");
const EXECUTION_RECORDS: TableDefinition<&str, &str> = TableDefinition::new("execution_records");

/// Single-file embedded [`StateStore`] backend (`redb:///path/to/file` DSN).
/// For a single-operator deployment with no external database dependency.
#[derive(Debug, Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

fn internal(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;
        let txn = db.begin_write().map_err(internal)?;
        txn.open_table(SHIPS).map_err(internal)?;
        txn.open_table(BINDINGS).map_err(internal)?;
        txn.open_table(EXECUTION_RECORDS).map_err(internal)?;
        txn.commit().map_err(internal)?;
        Ok(RedbStore { db: Arc::new(db) })
    }

    fn all_ships(&self) -> Result<Vec<Ship>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(SHIPS).map_err(internal)?;
        table
            .iter()
            .map_err(internal)?
            .map(|row| {
                let (_, v) = row.map_err(internal)?;
                Ok(serde_json::from_str(v.value())?)
            })
            .collect()
    }

    fn all_bindings(&self) -> Result<Vec<Binding>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(BINDINGS).map_err(internal)?;
        table
            .iter()
            .map_err(internal)?
            .map(|row| {
                let (_, v) = row.map_err(internal)?;
                Ok(serde_json::from_str(v.value())?)
            })
            .collect()
    }

    fn all_execution_records(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(EXECUTION_RECORDS).map_err(internal)?;
        table
            .iter()
            .map_err(internal)?
            .map(|row| {
                let (_, v) = row.map_err(internal)?;
                Ok(serde_json::from_str(v.value())?)
            })
            .collect()
    }
}

fn matches_filter(rec: &ExecutionRecord, filter: &ExecutionHistoryFilter) -> bool {
    if let Some(kind) = filter.exec_type {
        if rec.kind != kind {
            return false;
        }
    }
    if filter.success_only && !rec.success {
        return false;
    }
    if let Some(needle) = &filter.tag_contains {
        if !rec.tags.as_deref().unwrap_or("").contains(needle.as_str()) {
            return false;
        }
    }
    if let Some(want) = filter.has_notes {
        if rec.notes.is_some() != want {
            return false;
        }
    }
    if let Some(want) = filter.has_description {
        if rec.description.is_some() != want {
            return false;
        }
    }
    true
}

#[async_trait]
impl StateStore for RedbStore {
    async fn get_ship(&self, id: &ShipId) -> Result<Option<Ship>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(SHIPS).map_err(internal)?;
        match table.get(id.as_str()).map_err(internal)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    async fn upsert_ship(&self, ship: &Ship) -> Result<(), StoreError> {
        let json = serde_json::to_string(ship)?;
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(SHIPS).map_err(internal)?;
            table.insert(ship.id.as_str(), json.as_str()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    async fn delete_ship(&self, id: &ShipId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(SHIPS).map_err(internal)?;
            table.remove(id.as_str()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_ships(&self) -> Result<Vec<Ship>, StoreError> {
        self.all_ships()
    }

    async fn list_ships_by_status(&self, status: ShipStatus) -> Result<Vec<Ship>, StoreError> {
        Ok(self.all_ships()?.into_iter().filter(|s| s.status == status).collect())
    }

    async fn count_running_ships(&self) -> Result<usize, StoreError> {
        Ok(self
            .all_ships()?
            .into_iter()
            .filter(|s| s.status == ShipStatus::Running)
            .count())
    }

    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(BINDINGS).map_err(internal)?;
        match table.get(id.as_str()).map_err(internal)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    async fn upsert_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        let json = serde_json::to_string(binding)?;
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(internal)?;
            table.insert(binding.id.as_str(), json.as_str()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    async fn delete_binding(&self, id: &BindingId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(internal)?;
            table.remove(id.as_str()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    async fn bindings_for_ship(&self, ship_id: &ShipId) -> Result<Vec<Binding>, StoreError> {
        Ok(self.all_bindings()?.into_iter().filter(|b| &b.ship_id == ship_id).collect())
    }

    async fn bindings_for_session(&self, session_id: &SessionId) -> Result<Vec<Binding>, StoreError> {
        Ok(self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.session_id == session_id)
            .collect())
    }

    async fn binding_for_session_and_ship(
        &self,
        session_id: &SessionId,
        ship_id: &ShipId,
    ) -> Result<Option<Binding>, StoreError> {
        Ok(self
            .all_bindings()?
            .into_iter()
            .find(|b| &b.session_id == session_id && &b.ship_id == ship_id))
    }

    async fn active_binding_for_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let ships = self.all_ships()?;
        let mut candidates: Vec<(Binding, Ship)> = self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.session_id == session_id && b.is_active(now))
            .filter_map(|b| {
                ships
                    .iter()
                    .find(|s| s.id == b.ship_id && s.status == ShipStatus::Running)
                    .cloned()
                    .map(|s| (b, s))
            })
            .collect();
        candidates.sort_by_key(|(b, _)| std::cmp::Reverse(b.last_activity));
        Ok(candidates.into_iter().next())
    }

    async fn stopped_binding_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let ships = self.all_ships()?;
        let mut candidates: Vec<(Binding, Ship)> = self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.session_id == session_id)
            .filter_map(|b| {
                ships
                    .iter()
                    .find(|s| s.id == b.ship_id && s.status == ShipStatus::Stopped)
                    .cloned()
                    .map(|s| (b, s))
            })
            .collect();
        candidates.sort_by_key(|(_, s)| std::cmp::Reverse(s.updated_at));
        Ok(candidates.into_iter().next())
    }

    async fn warm_pool_candidate(&self, now: DateTime<Utc>) -> Result<Option<Ship>, StoreError> {
        let bindings = self.all_bindings()?;
        let mut candidates: Vec<Ship> = self
            .all_ships()?
            .into_iter()
            .filter(|s| s.status == ShipStatus::Running)
            .filter(|s| !bindings.iter().any(|b| b.ship_id == s.id && b.is_active(now)))
            .collect();
        candidates.sort_by_key(|s| s.created_at);
        Ok(candidates.into_iter().next())
    }

    async fn delete_bindings_for_ship(&self, ship_id: &ShipId) -> Result<usize, StoreError> {
        let to_remove: Vec<BindingId> = self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.ship_id == ship_id)
            .map(|b| b.id)
            .collect();
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(internal)?;
            for id in &to_remove {
                table.remove(id.as_str()).map_err(internal)?;
            }
        }
        txn.commit().map_err(internal)?;
        Ok(to_remove.len())
    }

    async fn delete_bindings_for_session(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        let to_remove: Vec<BindingId> = self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.session_id == session_id)
            .map(|b| b.id)
            .collect();
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(internal)?;
            for id in &to_remove {
                table.remove(id.as_str()).map_err(internal)?;
            }
        }
        txn.commit().map_err(internal)?;
        Ok(to_remove.len())
    }

    async fn expire_bindings_for_ship(
        &self,
        ship_id: &ShipId,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut to_update: Vec<Binding> = self
            .all_bindings()?
            .into_iter()
            .filter(|b| &b.ship_id == ship_id && b.is_active(now))
            .collect();
        for b in to_update.iter_mut() {
            b.expire_now(now);
        }
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(internal)?;
            for b in &to_update {
                let json = serde_json::to_string(b)?;
                table.insert(b.id.as_str(), json.as_str()).map_err(internal)?;
            }
        }
        txn.commit().map_err(internal)?;
        Ok(to_update.len())
    }

    async fn list_session_ids(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for b in self.all_bindings()? {
            if seen.insert(b.session_id.clone()) {
                ids.push(b.session_id);
            }
        }
        Ok(ids)
    }

    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = txn.open_table(EXECUTION_RECORDS).map_err(internal)?;
            table.insert(record.id.as_str(), json.as_str()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    async fn get_execution_record(
        &self,
        id: &ExecutionRecordId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(internal)?;
        let table = txn.open_table(EXECUTION_RECORDS).map_err(internal)?;
        match table.get(id.as_str()).map_err(internal)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    async fn update_execution_record_annotations(
        &self,
        id: &ExecutionRecordId,
        description: Option<String>,
        tags: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let Some(mut rec) = self.get_execution_record(id).await? else {
            return Ok(None);
        };
        if description.is_some() {
            rec.description = description;
        }
        if tags.is_some() {
            rec.tags = tags;
        }
        if notes.is_some() {
            rec.notes = notes;
        }
        self.append_execution_record(&rec).await?;
        Ok(Some(rec))
    }

    async fn list_execution_records(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<(Vec<ExecutionRecord>, usize), StoreError> {
        let mut matching: Vec<ExecutionRecord> = self
            .all_execution_records()?
            .into_iter()
            .filter(|r| &r.session_id == session_id && matches_filter(r, filter))
            .collect();
        matching.sort_by_key(|r| std::cmp::Reverse(r.created_at));
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
        Ok(self
            .all_execution_records()?
            .into_iter()
            .filter(|r| &r.session_id == session_id && matches_filter(r, filter))
            .max_by_key(|r| r.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let now = Utc::now();
        let ship = Ship::new_creating(ShipId::generate(), 60, now);
        {
            let store = RedbStore::open(&path).unwrap();
            store.upsert_ship(&ship).await.unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.id, ship.id);
    }

    #[tokio::test]
    async fn delete_ship_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("state.redb")).unwrap();
        let now = Utc::now();
        let ship = Ship::new_creating(ShipId::generate(), 60, now);
        store.upsert_ship(&ship).await.unwrap();
        store.delete_ship(&ship.id).await.unwrap();
        assert!(store.get_ship(&ship.id).await.unwrap().is_none());
    }
}
