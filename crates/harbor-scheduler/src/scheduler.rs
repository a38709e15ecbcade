use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harbor_domain::{Ship, ShipId, ShipStatus};
use harbor_driver::Driver;
use harbor_store::StateStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::SchedulerError;

/// Owns one deferred-cleanup task per Ship, the idiomatic analogue of the
/// original's `self._cleanup_tasks: Dict[str, asyncio.Task]`. Every
/// reschedule cancels whatever is currently pending for that Ship first, so
/// cancel-then-reschedule is atomic under the single `handles` mutex.
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    handles: Mutex<HashMap<ShipId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn StateStore>, driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(Scheduler { store, driver, handles: Mutex::new(HashMap::new()) })
    }

    /// Cancels any pending cleanup for `ship_id` and schedules a new one to
    /// fire `ttl_secs` from now (clamped at zero, meaning "immediately").
    pub async fn schedule(self: &Arc<Self>, ship_id: ShipId, ttl_secs: i64) {
        self.cancel(&ship_id).await;

        let scheduler = Arc::clone(self);
        let delay = Duration::from_secs(ttl_secs.max(0) as u64);
        let spawned_id = ship_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(spawned_id).await;
        });

        self.handles.lock().await.insert(ship_id, handle);
    }

    /// Cancels the pending cleanup for `ship_id`, if any, without scheduling
    /// a replacement.
    pub async fn cancel(&self, ship_id: &ShipId) {
        if let Some(handle) = self.handles.lock().await.remove(ship_id) {
            handle.abort();
        }
    }

    /// Recomputes a Ship's effective expiry from the latest expiry among its
    /// bindings and reschedules cleanup to fire at that time, mirroring
    /// `_recalculate_and_schedule_cleanup`. Called after every TTL-extending
    /// operation (refresh, extend, new binding).
    pub async fn recalculate_and_schedule(
        self: &Arc<Self>,
        ship_id: &ShipId,
    ) -> Result<(), SchedulerError> {
        let bindings = self.store.bindings_for_ship(ship_id).await?;
        let Some(max_expires_at) = bindings.iter().map(|b| b.expires_at).max() else {
            warn!(%ship_id, "no bindings found while recalculating cleanup, leaving schedule untouched");
            return Ok(());
        };

        let now = Utc::now();
        let remaining = (max_expires_at - now).num_seconds().max(0);

        if let Some(mut ship) = self.store.get_ship(ship_id).await? {
            ship.ttl = remaining;
            self.store.upsert_ship(&ship).await?;
        }

        info!(%ship_id, remaining, "rescheduled ship cleanup");
        self.schedule(ship_id.clone(), remaining).await;
        Ok(())
    }

    async fn fire(self: Arc<Self>, ship_id: ShipId) {
        let ship = match self.store.get_ship(&ship_id).await {
            Ok(Some(ship)) => ship,
            Ok(None) => {
                self.handles.lock().await.remove(&ship_id);
                return;
            }
            Err(e) => {
                error!(%ship_id, error = %e, "failed to load ship for scheduled cleanup");
                self.handles.lock().await.remove(&ship_id);
                return;
            }
        };

        if ship.status == ShipStatus::Running {
            if let Err(e) = self.stop(&ship).await {
                error!(%ship_id, error = %e, "failed to clean up ship after ttl expiration");
            } else {
                info!(%ship_id, "ship cleaned up after ttl expiration");
            }
        }

        self.handles.lock().await.remove(&ship_id);
    }

    async fn stop(&self, ship: &Ship) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let mut stopped = ship.clone();
        stopped.mark_stopped(now);
        self.store.upsert_ship(&stopped).await?;

        if let Some(handle) = &ship.container_handle {
            if let Err(e) = self.driver.stop_ship_container(handle).await {
                error!(ship_id = %ship.id, error = %e, "failed to stop container during scheduled cleanup");
            }
        }

        self.store.expire_bindings_for_ship(&ship.id, now).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_domain::{Binding, SessionId};
    use harbor_driver::LocalDriver;
    use harbor_store::InMemoryStore;

    #[tokio::test]
    async fn fires_after_ttl_and_stops_the_ship() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), Arc::new(LocalDriver::new()));

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), 1, now);
        ship.mark_running("c1".into(), "10.0.0.2:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        scheduler.schedule(ship.id.clone(), 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.status, ShipStatus::Stopped);
    }

    #[tokio::test]
    async fn rescheduling_cancels_the_previous_timer() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), Arc::new(LocalDriver::new()));

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), 60, now);
        ship.mark_running("c1".into(), "10.0.0.2:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        scheduler.schedule(ship.id.clone(), 0).await;
        scheduler.schedule(ship.id.clone(), 60).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.status, ShipStatus::Running, "the short-lived first timer must not have fired");
    }

    #[tokio::test]
    async fn recalculate_uses_the_latest_binding_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), Arc::new(LocalDriver::new()));

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), 10, now);
        ship.mark_running("c1".into(), "10.0.0.2:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        let b1 = Binding::new(SessionId::new("s1").unwrap(), ship.id.clone(), 10, now);
        let mut b2 = Binding::new(SessionId::new("s2").unwrap(), ship.id.clone(), 10, now);
        b2.expires_at = now + chrono::Duration::seconds(120);
        store.upsert_binding(&b1).await.unwrap();
        store.upsert_binding(&b2).await.unwrap();

        scheduler.recalculate_and_schedule(&ship.id).await.unwrap();
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert!(got.ttl >= 119 && got.ttl <= 120);
    }
}
