use std::sync::Arc;

use chrono::Utc;
use harbor_domain::ShipStatus;
use harbor_driver::Driver;
use harbor_store::StateStore;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::report::SweepReport;

/// One sweep: reconciles persisted Ship status against what the Driver
/// actually observes, then repairs orphaned active bindings on Stopped
/// Ships. Ported from `services/status/status_checker.py`'s
/// `_check_all_ships`/`_fix_stopped_ships_with_active_sessions`.
pub async fn sweep(store: &Arc<dyn StateStore>, driver: &Arc<dyn Driver>) -> Result<SweepReport, ReconcileError> {
    let mut report = SweepReport::default();

    let running = store.list_ships_by_status(ShipStatus::Running).await?;
    let stopped = store.list_ships_by_status(ShipStatus::Stopped).await?;
    debug!(running = running.len(), stopped = stopped.len(), "reconciler sweep starting");

    for ship in running {
        let Some(handle) = ship.container_handle.as_deref() else {
            warn!(ship_id = %ship.id, "running ship has no container handle, demoting");
            demote(store, ship, &mut report).await?;
            continue;
        };

        let is_running = driver.is_container_running(handle).await.unwrap_or(false);
        if !is_running {
            warn!(ship_id = %ship.id, container = handle, "running ship's container is not running, demoting");
            demote(store, ship, &mut report).await?;
        }
    }

    for ship in stopped {
        if let Some(handle) = ship.container_handle.as_deref() {
            if driver.is_container_running(handle).await.unwrap_or(false) {
                info!(ship_id = %ship.id, "stopped ship's container is running, promoting");
                let mut promoted = ship.clone();
                promoted.status = ShipStatus::Running;
                promoted.updated_at = Utc::now();
                store.upsert_ship(&promoted).await?;
                report.promoted.push(promoted.id);
            }
        }
    }

    // Second pass: any Stopped Ship should have no active bindings. A Ship
    // stopped outside the normal cleanup path (e.g. before this repair logic
    // existed, per the original's comment) can leave one behind.
    for ship in store.list_ships_by_status(ShipStatus::Stopped).await? {
        let expired = store.expire_bindings_for_ship(&ship.id, Utc::now()).await?;
        if expired > 0 {
            info!(ship_id = %ship.id, expired, "expired orphaned active binding(s) on stopped ship");
            report.orphan_bindings_expired += expired;
        }
    }

    if report.is_empty() {
        debug!("reconciler sweep found nothing to repair");
    } else {
        info!(
            demoted = report.demoted.len(),
            promoted = report.promoted.len(),
            orphan_bindings_expired = report.orphan_bindings_expired,
            "reconciler sweep repaired drift"
        );
    }

    Ok(report)
}

async fn demote(
    store: &Arc<dyn StateStore>,
    mut ship: harbor_domain::Ship,
    report: &mut SweepReport,
) -> Result<(), ReconcileError> {
    let now = Utc::now();
    ship.mark_stopped(now);
    store.upsert_ship(&ship).await?;
    store.expire_bindings_for_ship(&ship.id, now).await?;
    report.demoted.push(ship.id);
    Ok(())
}
