use std::sync::Arc;
use std::time::Duration;

use config::load::load_config;
use config::shared::{
    ClusterBackendConfig, EndpointConfig, JobConfig, StoreConfig, SyncTimingConfig, SyncerConfig,
};
use syncer::cluster::memory::MemoryClusterFactory;
use syncer::cluster::ClusterFactory;
use syncer::config::{RetryConfig, SyncConfig};
use syncer::manager::JobManager;
use syncer::spec::ClusterSpec;
use syncer::storage::memory::MemoryStore;
use syncer::storage::Store;
use tracing::{error, info};

pub async fn start_syncer() -> anyhow::Result<()> {
    let syncer_config: SyncerConfig = load_config()?;
    syncer_config.validate()?;

    let store = init_store(&syncer_config)?;
    let factory = init_cluster_factory(&syncer_config).await?;
    let sync_config = to_sync_config(&syncer_config.sync);

    let manager = Arc::new(JobManager::new(store, factory, sync_config));

    for job in &syncer_config.jobs {
        let src = to_cluster_spec(&job.source);
        let dest = to_cluster_spec(&job.destination);
        match manager.create_job(&job.name, src, dest, job.skip_error).await {
            Ok(_) => info!("job {} scheduled", job.name),
            Err(err) => error!("failed to create job {}: {err:#}", job.name),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down job workers...");
    manager.stop_all().await;

    Ok(())
}

fn init_store(config: &SyncerConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.store {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn init_cluster_factory(config: &SyncerConfig) -> anyhow::Result<Arc<dyn ClusterFactory>> {
    match config.cluster {
        ClusterBackendConfig::Memory => {
            let factory = MemoryClusterFactory::new();
            seed_memory_clusters(&factory, &config.jobs).await;
            Ok(Arc::new(factory))
        }
    }
}

/// The memory backend has no external clusters behind it; seed the source
/// databases and tables the configured jobs expect so they can bootstrap.
async fn seed_memory_clusters(factory: &MemoryClusterFactory, jobs: &[JobConfig]) {
    let mut next_db_id = 1;
    let mut next_table_id = 100;
    for job in jobs {
        let src = factory.cluster(&job.source.host);
        src.add_database(&job.source.database, next_db_id, true).await;
        next_db_id += 1;

        if !job.source.table.is_empty() {
            src.add_table(&job.source.database, &job.source.table, next_table_id, 0)
                .await;
            next_table_id += 1;
        }
    }
}

fn to_cluster_spec(endpoint: &EndpointConfig) -> ClusterSpec {
    ClusterSpec {
        host: endpoint.host.clone(),
        port: endpoint.port,
        user: endpoint.user.clone(),
        password: endpoint.password.clone(),
        database: endpoint.database.clone(),
        db_id: 0,
        table: endpoint.table.clone(),
        table_id: 0,
        frontends: vec![],
    }
}

fn to_sync_config(timing: &SyncTimingConfig) -> SyncConfig {
    SyncConfig {
        sync_interval: Duration::from_secs(timing.sync_interval_secs),
        restore_check_retry: RetryConfig {
            max_attempts: timing.restore_check_retry.max_attempts,
            initial_delay: Duration::from_millis(timing.restore_check_retry.initial_delay_ms),
            max_delay: Duration::from_millis(timing.restore_check_retry.max_delay_ms),
            backoff_factor: timing.restore_check_retry.backoff_factor,
        },
    }
}
