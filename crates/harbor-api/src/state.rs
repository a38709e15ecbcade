use std::sync::Arc;

use harbor_config::Settings;
use harbor_driver::Driver;
use harbor_proxy::Proxy;
use harbor_resolver::Resolver;
use harbor_scheduler::Scheduler;
use harbor_store::StateStore;

/// Everything a handler needs, built once at startup per DESIGN.md's "single
/// `Core` value" note (spec.md §9 Design Notes) rather than reached for as
/// module-global state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub driver: Arc<dyn Driver>,
    pub scheduler: Arc<Scheduler>,
    pub resolver: Arc<Resolver>,
    pub proxy: Arc<Proxy>,
    pub settings: Arc<Settings>,
}
