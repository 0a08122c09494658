//! Binary entry point: loads configuration, runs migrations, builds the
//! `Coordinator`, and serves until interrupted.

use fleetd::config::ConfigLoader;
use fleetd::infrastructure::sqlite::{all_embedded_migrations, create_pool, Migrator};
use fleetd::{logging, Coordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger_guard = logging::init(&config.logging)?;

    tracing::info!(max_workers = config.max_workers, "starting fleetd");

    let pool = create_pool(&config.database.path, None).await?;
    let migrator = Migrator::new(pool.clone());
    let applied = migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    tracing::info!(applied, "migrations applied");

    let coordinator = Coordinator::new(pool, &config);

    let recovered = coordinator.recover_on_startup().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "marked orphaned workers from a previous run as errored");
    }

    coordinator.run();
    tracing::info!("fleetd running, press ctrl-c to shut down");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, dismissing workers");

    let dismissed = coordinator.shutdown().await?;
    tracing::info!(dismissed, "shutdown complete");

    Ok(())
}
