use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harbor_domain::{
    Binding, BindingId, ExecutionRecord, ExecutionRecordId, Ship, ShipId, ShipStatus, SessionId,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::filter::ExecutionHistoryFilter;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    ships: HashMap<ShipId, Ship>,
    bindings: HashMap<BindingId, Binding>,
    execution_records: HashMap<ExecutionRecordId, ExecutionRecord>,
}

/// In-memory implementation of [`StateStore`]. All data is lost on process
/// exit — suitable for tests and single-process demo deployments (`memory://`
/// store DSN).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
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
impl StateStore for InMemoryStore {
    async fn get_ship(&self, id: &ShipId) -> Result<Option<Ship>, StoreError> {
        Ok(self.inner.read().await.ships.get(id).cloned())
    }

    async fn upsert_ship(&self, ship: &Ship) -> Result<(), StoreError> {
        self.inner.write().await.ships.insert(ship.id.clone(), ship.clone());
        Ok(())
    }

    async fn delete_ship(&self, id: &ShipId) -> Result<(), StoreError> {
        self.inner.write().await.ships.remove(id);
        Ok(())
    }

    async fn list_ships(&self) -> Result<Vec<Ship>, StoreError> {
        Ok(self.inner.read().await.ships.values().cloned().collect())
    }

    async fn list_ships_by_status(&self, status: ShipStatus) -> Result<Vec<Ship>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .ships
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn count_running_ships(&self) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .ships
            .values()
            .filter(|s| s.status == ShipStatus::Running)
            .count())
    }

    async fn get_binding(&self, id: &BindingId) -> Result<Option<Binding>, StoreError> {
        Ok(self.inner.read().await.bindings.get(id).cloned())
    }

    async fn upsert_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .bindings
            .insert(binding.id.clone(), binding.clone());
        Ok(())
    }

    async fn delete_binding(&self, id: &BindingId) -> Result<(), StoreError> {
        self.inner.write().await.bindings.remove(id);
        Ok(())
    }

    async fn bindings_for_ship(&self, ship_id: &ShipId) -> Result<Vec<Binding>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .bindings
            .values()
            .filter(|b| &b.ship_id == ship_id)
            .cloned()
            .collect())
    }

    async fn bindings_for_session(&self, session_id: &SessionId) -> Result<Vec<Binding>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .bindings
            .values()
            .filter(|b| &b.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn binding_for_session_and_ship(
        &self,
        session_id: &SessionId,
        ship_id: &ShipId,
    ) -> Result<Option<Binding>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .bindings
            .values()
            .find(|b| &b.session_id == session_id && &b.ship_id == ship_id)
            .cloned())
    }

    async fn active_binding_for_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let guard = self.inner.read().await;
        let mut candidates: Vec<(Binding, Ship)> = guard
            .bindings
            .values()
            .filter(|b| &b.session_id == session_id && b.is_active(now))
            .filter_map(|b| {
                guard
                    .ships
                    .get(&b.ship_id)
                    .filter(|s| s.status == ShipStatus::Running)
                    .map(|s| (b.clone(), s.clone()))
            })
            .collect();
        candidates.sort_by_key(|(b, _)| std::cmp::Reverse(b.last_activity));
        Ok(candidates.into_iter().next())
    }

    async fn stopped_binding_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<(Binding, Ship)>, StoreError> {
        let guard = self.inner.read().await;
        let mut candidates: Vec<(Binding, Ship)> = guard
            .bindings
            .values()
            .filter(|b| &b.session_id == session_id)
            .filter_map(|b| {
                guard
                    .ships
                    .get(&b.ship_id)
                    .filter(|s| s.status == ShipStatus::Stopped)
                    .map(|s| (b.clone(), s.clone()))
            })
            .collect();
        candidates.sort_by_key(|(_, s)| std::cmp::Reverse(s.updated_at));
        Ok(candidates.into_iter().next())
    }

    async fn warm_pool_candidate(&self, now: DateTime<Utc>) -> Result<Option<Ship>, StoreError> {
        let guard = self.inner.read().await;
        let mut candidates: Vec<Ship> = guard
            .ships
            .values()
            .filter(|s| s.status == ShipStatus::Running)
            .filter(|s| {
                !guard
                    .bindings
                    .values()
                    .any(|b| &b.ship_id == &s.id && b.is_active(now))
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|s| s.created_at);
        Ok(candidates.into_iter().next())
    }

    async fn delete_bindings_for_ship(&self, ship_id: &ShipId) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.bindings.len();
        guard.bindings.retain(|_, b| &b.ship_id != ship_id);
        Ok(before - guard.bindings.len())
    }

    async fn delete_bindings_for_session(&self, session_id: &SessionId) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.bindings.len();
        guard.bindings.retain(|_, b| &b.session_id != session_id);
        Ok(before - guard.bindings.len())
    }

    async fn expire_bindings_for_ship(
        &self,
        ship_id: &ShipId,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().await;
        let mut count = 0;
        for b in guard.bindings.values_mut() {
            if &b.ship_id == ship_id && b.is_active(now) {
                b.expire_now(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_session_ids(&self) -> Result<Vec<SessionId>, StoreError> {
        let guard = self.inner.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for b in guard.bindings.values() {
            if seen.insert(b.session_id.clone()) {
                ids.push(b.session_id.clone());
            }
        }
        Ok(ids)
    }

    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .execution_records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_execution_record(
        &self,
        id: &ExecutionRecordId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.inner.read().await.execution_records.get(id).cloned())
    }

    async fn update_execution_record_annotations(
        &self,
        id: &ExecutionRecordId,
        description: Option<String>,
        tags: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(rec) = guard.execution_records.get_mut(id) {
            if description.is_some() {
                rec.description = description;
            }
            if tags.is_some() {
                rec.tags = tags;
            }
            if notes.is_some() {
                rec.notes = notes;
            }
            Ok(Some(rec.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list_execution_records(
        &self,
        session_id: &SessionId,
        filter: &ExecutionHistoryFilter,
    ) -> Result<(Vec<ExecutionRecord>, usize), StoreError> {
        let guard = self.inner.read().await;
        let mut matching: Vec<ExecutionRecord> = guard
            .execution_records
            .values()
            .filter(|r| &r.session_id == session_id && matches_filter(r, filter))
            .cloned()
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
        let guard = self.inner.read().await;
        Ok(guard
            .execution_records
            .values()
            .filter(|r| &r.session_id == session_id && matches_filter(r, filter))
            .max_by_key(|r| r.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_domain::ExecKind;

    fn new_ship(now: DateTime<Utc>) -> Ship {
        Ship::new_creating(ShipId::generate(), 60, now)
    }

    #[tokio::test]
    async fn upsert_and_get_ship() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let ship = new_ship(now);
        store.upsert_ship(&ship).await.unwrap();
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.id, ship.id);
    }

    #[tokio::test]
    async fn warm_pool_candidate_excludes_actively_bound_ships() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut ship = new_ship(now);
        ship.mark_running("c1".into(), "10.0.0.2".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        assert!(store.warm_pool_candidate(now).await.unwrap().is_some());

        let session = SessionId::new("s1").unwrap();
        let binding = Binding::new(session, ship.id.clone(), 60, now);
        store.upsert_binding(&binding).await.unwrap();

        assert!(store.warm_pool_candidate(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_binding_for_session_requires_running_ship() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut ship = new_ship(now);
        ship.mark_running("c1".into(), "10.0.0.2".into(), now);
        store.upsert_ship(&ship).await.unwrap();
        let session = SessionId::new("s1").unwrap();
        let binding = Binding::new(session.clone(), ship.id.clone(), 60, now);
        store.upsert_binding(&binding).await.unwrap();

        let found = store.active_binding_for_session(&session, now).await.unwrap();
        assert!(found.is_some());

        ship.mark_stopped(now);
        store.upsert_ship(&ship).await.unwrap();
        let found = store.active_binding_for_session(&session, now).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn expire_bindings_for_ship_only_touches_that_ship() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let ship_a = new_ship(now);
        let ship_b = new_ship(now);
        store.upsert_ship(&ship_a).await.unwrap();
        store.upsert_ship(&ship_b).await.unwrap();
        let s1 = SessionId::new("s1").unwrap();
        let s2 = SessionId::new("s2").unwrap();
        store
            .upsert_binding(&Binding::new(s1, ship_a.id.clone(), 60, now))
            .await
            .unwrap();
        store
            .upsert_binding(&Binding::new(s2, ship_b.id.clone(), 60, now))
            .await
            .unwrap();

        let count = store.expire_bindings_for_ship(&ship_a.id, now).await.unwrap();
        assert_eq!(count, 1);
        let remaining = store.bindings_for_ship(&ship_b.id).await.unwrap();
        assert!(remaining[0].is_active(now));
    }

    #[tokio::test]
    async fn execution_history_filters_and_paginates() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let session = SessionId::new("s1").unwrap();
        for i in 0..5 {
            let rec = ExecutionRecord {
                id: ExecutionRecordId::generate(),
                session_id: session.clone(),
                kind: if i % 2 == 0 { ExecKind::Shell } else { ExecKind::Python },
                code_or_command: format!("cmd-{i}"),
                success: i != 3,
                execution_time_ms: Some(i),
                created_at: now + chrono::Duration::seconds(i),
                description: None,
                tags: None,
                notes: None,
            };
            store.append_execution_record(&rec).await.unwrap();
        }

        let filter = ExecutionHistoryFilter {
            exec_type: Some(ExecKind::Shell),
            ..Default::default()
        };
        let (shell_only, total) = store.list_execution_records(&session, &filter).await.unwrap();
        assert_eq!(total, 3);
        assert!(shell_only.iter().all(|r| r.kind == ExecKind::Shell));

        let filter = ExecutionHistoryFilter { limit: Some(2), offset: 1, ..Default::default() };
        let (page, total) = store.list_execution_records(&session, &filter).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }
}
