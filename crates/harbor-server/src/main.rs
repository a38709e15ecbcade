use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harbor_config::Settings;
use harbor_driver::Driver;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Process-level overrides for the handful of settings an operator is most
/// likely to need to flip per-invocation without touching `HARBOR_*` env
/// vars. Everything else is read from the environment via [`Settings::from_env`].
#[derive(Debug, Parser)]
#[command(name = "harbor-server", about = "Harbor sandbox control plane", version)]
struct Args {
    /// Override `HARBOR_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Override `HARBOR_PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// Use the in-process fake driver instead of `HARBOR_CONTAINER_DRIVER`.
    /// Never creates real containers — for local development and demos.
    #[arg(long)]
    local_driver: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("failed to load configuration")?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    let settings = Arc::new(settings);

    let driver = if args.local_driver {
        info!("using local fake driver, no containers will actually be created");
        harbor_driver::build_local_driver()
    } else {
        harbor_driver::build_driver(&settings).context("failed to build container driver")?
    };
    driver.initialize().await.context("failed to initialize container driver")?;

    let store = harbor_store::build_store(&settings.store_dsn)
        .await
        .with_context(|| format!("failed to open store at '{}'", settings.store_dsn))?;

    let scheduler = harbor_scheduler::Scheduler::new(store.clone(), driver.clone());
    let resolver = Arc::new(harbor_resolver::Resolver::new(
        store.clone(),
        driver.clone(),
        scheduler.clone(),
        settings.ship_container_port,
        settings.max_ship_num,
        settings.behavior_after_max_ship,
        std::time::Duration::from_secs(settings.ship_health_check_timeout_secs),
        std::time::Duration::from_secs(settings.ship_health_check_interval_secs),
    ));
    let proxy = Arc::new(harbor_proxy::Proxy::new(store.clone(), scheduler.clone(), settings.ship_container_port));

    let _reconciler = harbor_reconciler::spawn(
        store.clone(),
        driver.clone(),
        std::time::Duration::from_secs(settings.reconciler_interval_secs),
    );

    let app = harbor_api::build_app(store, driver, scheduler, resolver, proxy, settings.clone());

    let addr = format!("{}:{}", settings.host, settings.port);
    info!(%addr, driver = ?settings.container_driver, store_dsn = %settings.store_dsn, "starting harbor-server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
