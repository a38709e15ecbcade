use harbor_domain::ShipId;

/// Tally of one sweep, returned for logging and tests. Mirrors the
/// `updated_count`/`fixed_count` the original logs at the end of
/// `_check_all_ships`/`_fix_stopped_ships_with_active_sessions`.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub demoted: Vec<ShipId>,
    pub promoted: Vec<ShipId>,
    pub orphan_bindings_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.demoted.is_empty() && self.promoted.is_empty() && self.orphan_bindings_expired == 0
    }
}
