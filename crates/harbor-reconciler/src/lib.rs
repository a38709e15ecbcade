mod error;
mod reconcile;
mod report;

use std::sync::Arc;
use std::time::Duration;

use harbor_driver::Driver;
use harbor_store::StateStore;
use tokio::task::JoinHandle;
use tracing::error;

pub use error::ReconcileError;
pub use reconcile::sweep;
pub use report::SweepReport;

/// Spawns the fixed-interval reconcile loop as a background task, matching
/// `StatusChecker._run`: sweep, log-and-swallow any error, sleep, repeat —
/// this task is never expected to exit under normal operation.
pub fn spawn(store: Arc<dyn StateStore>, driver: Arc<dyn Driver>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep(&store, &driver).await {
                error!(error = %e, "reconciler sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use harbor_domain::{Ship, ShipId, ShipStatus};
    use harbor_driver::LocalDriver;
    use harbor_store::InMemoryStore;

    #[tokio::test]
    async fn demotes_a_running_ship_whose_container_died() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let driver: Arc<dyn Driver> = Arc::new(DeadDriver);

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), 60, now);
        ship.mark_running("gone".into(), "10.0.0.5:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        let report = sweep(&store, &driver).await.unwrap();
        assert_eq!(report.demoted, vec![ship.id.clone()]);
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.status, ShipStatus::Stopped);
    }

    #[tokio::test]
    async fn promotes_a_stopped_ship_whose_container_is_actually_running() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());

        let now = Utc::now();
        let mut ship = Ship::new_creating(ShipId::generate(), 60, now);
        ship.mark_running("c1".into(), "10.0.0.5:8080".into(), now);
        ship.status = ShipStatus::Stopped;
        store.upsert_ship(&ship).await.unwrap();

        let report = sweep(&store, &driver).await.unwrap();
        assert_eq!(report.promoted, vec![ship.id.clone()]);
    }

    #[tokio::test]
    async fn creating_ships_are_left_untouched() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let driver: Arc<dyn Driver> = Arc::new(DeadDriver);

        let ship = Ship::new_creating(ShipId::generate(), 60, Utc::now());
        store.upsert_ship(&ship).await.unwrap();

        let report = sweep(&store, &driver).await.unwrap();
        assert!(report.is_empty());
        let got = store.get_ship(&ship.id).await.unwrap().unwrap();
        assert_eq!(got.status, ShipStatus::Creating);
    }

    struct DeadDriver;

    #[async_trait::async_trait]
    impl Driver for DeadDriver {
        fn name(&self) -> &'static str {
            "dead"
        }
        async fn initialize(&self) -> Result<(), harbor_driver::DriverError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), harbor_driver::DriverError> {
            Ok(())
        }
        async fn create_ship_container(
            &self,
            _ship: &harbor_domain::Ship,
            _spec: Option<&harbor_domain::ShipSpec>,
        ) -> Result<harbor_driver::ContainerInfo, harbor_driver::DriverError> {
            unimplemented!("not exercised by these tests")
        }
        async fn stop_ship_container(&self, _container_id: &str) -> Result<bool, harbor_driver::DriverError> {
            Ok(true)
        }
        fn ship_data_exists(&self, _ship_id: &str) -> bool {
            true
        }
        async fn get_container_logs(&self, _container_id: &str) -> Result<String, harbor_driver::DriverError> {
            Ok(String::new())
        }
        async fn is_container_running(&self, _container_id: &str) -> Result<bool, harbor_driver::DriverError> {
            Ok(false)
        }
    }
}
