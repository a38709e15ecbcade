use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harbor_config::OverflowPolicy;
use harbor_domain::{Binding, Ship, ShipId, ShipSpec, SessionId};
use harbor_driver::Driver;
use harbor_scheduler::Scheduler;
use harbor_store::StateStore;
use tracing::{error, info, warn};

use crate::error::ResolverError;
use crate::health::{ship_health_url, wait_until_healthy, HealthCheck, HttpHealthCheck};

/// Produces a Running Ship bound to a session, applying the reuse → restore →
/// warm-pool → create ladder. Grounded on `services/ship/service.py`'s
/// `create_ship`/`_restore_ship`, minus the deprecated multi-session branch
/// (see DESIGN.md Open Question decision 2).
pub struct Resolver {
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    scheduler: Arc<Scheduler>,
    health_check: Arc<dyn HealthCheck>,
    container_port: u16,
    max_ship_num: usize,
    overflow: OverflowPolicy,
    health_timeout: Duration,
    health_interval: Duration,
}

impl Resolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StateStore>,
        driver: Arc<dyn Driver>,
        scheduler: Arc<Scheduler>,
        container_port: u16,
        max_ship_num: usize,
        overflow: OverflowPolicy,
        health_timeout: Duration,
        health_interval: Duration,
    ) -> Self {
        Resolver {
            store,
            driver,
            scheduler,
            health_check: Arc::new(HttpHealthCheck::new()),
            container_port,
            max_ship_num,
            overflow,
            health_timeout,
            health_interval,
        }
    }

    /// Overrides the health-check seam; used by tests to avoid real sockets.
    pub fn with_health_check(mut self, health_check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = health_check;
        self
    }

    pub async fn resolve(
        &self,
        session_id: &SessionId,
        ttl: i64,
        spec: Option<&ShipSpec>,
        force_create: bool,
    ) -> Result<Ship, ResolverError> {
        if !force_create {
            if let Some(ship) = self.try_reuse_active(session_id).await? {
                return Ok(ship);
            }
            if let Some(ship) = self.try_restore_stopped(session_id, ttl, spec).await? {
                return Ok(ship);
            }
            if let Some(ship) = self.try_warm_pool(session_id, ttl).await? {
                return Ok(ship);
            }
        }
        self.create_new(session_id, ttl, spec).await
    }

    /// Rung 1: reuse an already-Running Ship this session is bound to, if the
    /// Driver confirms it is still alive.
    async fn try_reuse_active(&self, session_id: &SessionId) -> Result<Option<Ship>, ResolverError> {
        let now = Utc::now();
        let Some((mut binding, ship)) = self.store.active_binding_for_session(session_id, now).await?
        else {
            return Ok(None);
        };

        let handle = ship.container_handle.as_deref().unwrap_or("");
        if self.driver.is_container_running(handle).await.unwrap_or(false) {
            binding.refresh(now);
            self.store.upsert_binding(&binding).await?;
            return Ok(Some(ship));
        }

        warn!(ship_id = %ship.id, "active ship's container is no longer running, marking stopped");
        let mut stopped = ship;
        stopped.mark_stopped(now);
        self.store.upsert_ship(&stopped).await?;
        Ok(None)
    }

    /// Rung 2: restore the session's most recent Stopped Ship, if its on-disk
    /// data is still present.
    async fn try_restore_stopped(
        &self,
        session_id: &SessionId,
        ttl: i64,
        spec: Option<&ShipSpec>,
    ) -> Result<Option<Ship>, ResolverError> {
        let Some((binding, ship)) = self.store.stopped_binding_for_session(session_id).await? else {
            return Ok(None);
        };

        if !self.driver.ship_data_exists(ship.id.as_str()) {
            info!(ship_id = %ship.id, "stopped ship has no recoverable data, skipping restore");
            return Ok(None);
        }

        Ok(Some(self.restore(ship, binding, ttl, spec).await?))
    }

    /// Rung 3: take over an idle Running Ship nobody is currently bound to.
    /// Re-verifies the candidate is still running right before committing,
    /// since the candidate lookup and the bind are not coordinated — per
    /// spec, a mismatch here falls through to rung 4 rather than erroring.
    async fn try_warm_pool(&self, session_id: &SessionId, ttl: i64) -> Result<Option<Ship>, ResolverError> {
        let now = Utc::now();
        let Some(candidate) = self.store.warm_pool_candidate(now).await? else {
            return Ok(None);
        };

        let handle = candidate.container_handle.as_deref().unwrap_or("");
        if !self.driver.is_container_running(handle).await.unwrap_or(false) {
            warn!(ship_id = %candidate.id, "warm pool candidate is no longer running, falling through");
            return Ok(None);
        }

        let binding = Binding::new(session_id.clone(), candidate.id.clone(), ttl, now);
        self.store.upsert_binding(&binding).await?;
        self.scheduler.recalculate_and_schedule(&candidate.id).await?;
        info!(session_id = %session_id, ship_id = %candidate.id, "session joined warm pool ship");
        Ok(Some(candidate))
    }

    /// Rung 4: admit, persist a Creating row, create the container, probe
    /// health, then bind and transition to Running. Any failure along the way
    /// deletes the row and surfaces the error, matching the original's
    /// wrap-the-whole-attempt-in-try/except/delete semantics.
    async fn create_new(
        &self,
        session_id: &SessionId,
        ttl: i64,
        spec: Option<&ShipSpec>,
    ) -> Result<Ship, ResolverError> {
        self.admit().await?;

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), ttl, now);
        self.store.upsert_ship(&ship).await?;

        if let Err(e) = self.create_and_ready(&mut ship, spec).await {
            error!(ship_id = %ship.id, error = %e, "failed to create ship, deleting row");
            let _ = self.store.delete_ship(&ship.id).await;
            return Err(e);
        }

        let now = Utc::now();
        let binding = Binding::new(session_id.clone(), ship.id.clone(), ttl, now);
        self.store.upsert_binding(&binding).await?;

        ship.mark_running(
            ship.container_handle.clone().unwrap_or_default(),
            ship.address.clone().unwrap_or_default(),
            now,
        );
        self.store.upsert_ship(&ship).await?;
        self.scheduler.recalculate_and_schedule(&ship.id).await?;

        info!(ship_id = %ship.id, %session_id, "ship created and ready");
        Ok(ship)
    }

    /// Shared by rung 4 and restore: creates the container, persists the
    /// handle/address, then probes health — reverting progress on failure is
    /// the caller's responsibility (rung 4 deletes the row, restore reverts
    /// to Stopped).
    async fn create_and_ready(
        &self,
        ship: &mut Ship,
        spec: Option<&ShipSpec>,
    ) -> Result<(), ResolverError> {
        let container = self.driver.create_ship_container(ship, spec).await?;
        ship.container_handle = Some(container.container_id);
        let Some(address) = container.ip_address else {
            self.store.upsert_ship(ship).await?;
            return Err(ResolverError::NoAddress);
        };
        ship.address = Some(address.clone());
        self.store.upsert_ship(ship).await?;

        let url = ship_health_url(&address, self.container_port);
        info!(ship_id = %ship.id, url, "waiting for ship to become ready");
        let healthy =
            wait_until_healthy(self.health_check.as_ref(), &url, self.health_timeout, self.health_interval)
                .await;

        if !healthy {
            if let Some(handle) = &ship.container_handle {
                let _ = self.driver.stop_ship_container(handle).await;
            }
            return Err(ResolverError::HealthTimeout);
        }
        Ok(())
    }

    /// §4.3.1 Restore: recreate the container against the existing Ship row
    /// (remounting its on-disk data), refresh the session's existing binding,
    /// and recompute cleanup. On health-check failure the Ship reverts to
    /// Stopped rather than being deleted, since restoring is recoverable.
    async fn restore(
        &self,
        mut ship: Ship,
        mut binding: Binding,
        ttl: i64,
        spec: Option<&ShipSpec>,
    ) -> Result<Ship, ResolverError> {
        if let Err(e) = self.create_and_ready(&mut ship, spec).await {
            error!(ship_id = %ship.id, error = %e, "failed to restore ship, reverting to stopped");
            ship.mark_stopped(Utc::now());
            self.store.upsert_ship(&ship).await?;
            return Err(e);
        }

        let now = Utc::now();
        ship.mark_running(
            ship.container_handle.clone().unwrap_or_default(),
            ship.address.clone().unwrap_or_default(),
            now,
        );
        self.store.upsert_ship(&ship).await?;

        binding.expires_at = now + chrono::Duration::seconds(ttl);
        binding.initial_ttl = ttl;
        binding.last_activity = now;
        self.store.upsert_binding(&binding).await?;
        self.scheduler.recalculate_and_schedule(&ship.id).await?;

        info!(ship_id = %ship.id, "ship restored");
        Ok(ship)
    }

    /// Admission control for rung 4: reject outright, or poll for a free slot
    /// up to 5 minutes (every 5 seconds), per the configured overflow policy.
    async fn admit(&self) -> Result<(), ResolverError> {
        let running = self.store.count_running_ships().await?;
        if running < self.max_ship_num {
            return Ok(());
        }

        match self.overflow {
            OverflowPolicy::Reject => Err(ResolverError::CapacityExceeded { running, max: self.max_ship_num }),
            OverflowPolicy::Wait => {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(300);
                loop {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(ResolverError::CapacityWaitTimeout { running, max: self.max_ship_num });
                    }
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    let running = self.store.count_running_ships().await?;
                    if running < self.max_ship_num {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harbor_driver::LocalDriver;
    use harbor_store::InMemoryStore;

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn probe(&self, _url: &str) -> bool {
            true
        }
    }

    struct NeverHealthy;
    #[async_trait]
    impl HealthCheck for NeverHealthy {
        async fn probe(&self, _url: &str) -> bool {
            false
        }
    }

    fn resolver(store: Arc<dyn StateStore>, health: Arc<dyn HealthCheck>) -> Resolver {
        let driver = Arc::new(LocalDriver::new());
        let scheduler = Scheduler::new(store.clone(), driver.clone());
        Resolver::new(
            store,
            driver,
            scheduler,
            8123,
            10,
            OverflowPolicy::Reject,
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .with_health_check(health)
    }

    #[tokio::test]
    async fn creates_a_new_ship_when_none_exists() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let r = resolver(store.clone(), Arc::new(AlwaysHealthy));
        let session = SessionId::new("s1").unwrap();

        let ship = r.resolve(&session, 60, None, false).await.unwrap();
        assert_eq!(ship.status, harbor_domain::ShipStatus::Running);
        assert_eq!(store.list_ships().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reuses_the_active_binding_on_a_second_call() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let r = resolver(store.clone(), Arc::new(AlwaysHealthy));
        let session = SessionId::new("s1").unwrap();

        let first = r.resolve(&session, 60, None, false).await.unwrap();
        let second = r.resolve(&session, 60, None, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_ships().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn force_create_bypasses_reuse() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let r = resolver(store.clone(), Arc::new(AlwaysHealthy));
        let session = SessionId::new("s1").unwrap();

        let first = r.resolve(&session, 60, None, false).await.unwrap();
        let second = r.resolve(&session, 60, None, true).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn health_timeout_deletes_the_new_ship_row() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let r = resolver(store.clone(), Arc::new(NeverHealthy));
        let session = SessionId::new("s1").unwrap();

        let err = r.resolve(&session, 60, None, false).await.unwrap_err();
        assert!(matches!(err, ResolverError::HealthTimeout));
        assert!(store.list_ships().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_different_session_takes_over_an_idle_warm_ship() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let r = resolver(store.clone(), Arc::new(AlwaysHealthy));

        let owner = SessionId::new("owner").unwrap();
        let ship = r.resolve(&owner, 60, None, false).await.unwrap();

        // Owner's binding expires, leaving the ship idle and eligible for
        // warm-pool takeover.
        store.expire_bindings_for_ship(&ship.id, Utc::now()).await.unwrap();

        let other = SessionId::new("other").unwrap();
        let taken_over = r.resolve(&other, 60, None, false).await.unwrap();
        assert_eq!(taken_over.id, ship.id);
        assert_eq!(store.list_ships().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capacity_reject_surfaces_when_ceiling_is_zero() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let driver = Arc::new(LocalDriver::new());
        let scheduler = Scheduler::new(store.clone(), driver.clone());
        let r = Resolver::new(
            store.clone(),
            driver,
            scheduler,
            8123,
            0,
            OverflowPolicy::Reject,
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .with_health_check(Arc::new(AlwaysHealthy));

        let session = SessionId::new("s1").unwrap();
        let err = r.resolve(&session, 60, None, false).await.unwrap_err();
        assert!(matches!(err, ResolverError::CapacityExceeded { .. }));
    }
}
