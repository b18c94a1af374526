use std::sync::Arc;

use anyhow::Context;
use imagepack::config::AppConfig;
use imagepack::database::init_db;
use imagepack::lifecycle::BuildLifecycle;
use imagepack::poller::run_status_poller;
use imagepack::registry::HarborRegistry;
use imagepack::runner::KubeJobRunner;
use imagepack::store::SeaOrmStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load config")?;
    config.validate().context("Invalid config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected, schema synced");

    let store = Arc::new(SeaOrmStore::new(db));
    let runner = KubeJobRunner::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let registry = HarborRegistry::new(&config.harbor);

    info!(
        namespace = %config.build.namespace,
        registry = %config.build.registry_server,
        harbor = %config.harbor.url,
        "Build backends ready"
    );

    let lifecycle = BuildLifecycle::new(
        store.clone(),
        store,
        Arc::new(runner),
        Arc::new(registry),
        Arc::new(config.build.clone()),
    );

    if config.poller.enabled {
        tokio::spawn(run_status_poller(
            lifecycle.clone(),
            config.poller.interval_secs,
        ));
    } else {
        info!("Build status poller disabled");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    Ok(())
}
