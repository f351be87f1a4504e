// Fleet Coordinator.
//
// Implements spec §4.5: owns the pool map behind a single mutex, exposes the
// `PoolManager` capability the control interface drives, and orchestrates
// startup/reload/shutdown. Grounded on `auser-mvm`'s coordinator-style
// `Arc<State>` + concurrent-shutdown fan-out pattern, adapted to the
// teacher's plain-struct idiom (no TCP proxy internals are reused, only the
// ownership shape).

use crate::config::{Config, PoolConfig};
use crate::credentials::CredentialIssuer;
use crate::error::Error;
use crate::image::SharedImageStore;
use crate::metrics;
use crate::pool::Pool;
use crate::types::PoolStatus;
use crate::vm::Hypervisor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Narrow capability surface the control interface is driven through. The
/// `Fleet` is the single production implementation; tests substitute a
/// double (spec §9's "interface-typed capability" redesign hint — kept
/// narrow, not widened).
#[async_trait::async_trait]
pub trait PoolManager: Send + Sync {
    async fn list_pools(&self) -> Vec<PoolStatus>;
    async fn get_pool(&self, name: &str) -> Result<PoolStatus, Error>;
    async fn scale_pool(&self, name: &str, delta: i64) -> Result<(), Error>;
    async fn pause_pool(&self, name: &str) -> Result<(), Error>;
    async fn resume_pool(&self, name: &str) -> Result<(), Error>;
    async fn reload(&self) -> Result<(), Error>;

    /// Routes a job-queued event to the first pool whose `runner.labels` is
    /// a subset of `event_labels` (fleet iteration order is unspecified;
    /// spec §9's open question #2). No match is silently acknowledged.
    async fn route_job_queued(&self, event_labels: &[String]) -> Result<(), Error>;
}

pub struct Fleet {
    pools: Mutex<HashMap<String, Arc<Pool>>>,
    pools_root: PathBuf,
    config_path: PathBuf,
    image_store: SharedImageStore,
    credential_issuer: Arc<dyn CredentialIssuer>,
    hypervisor: Arc<dyn Hypervisor>,
}

impl Fleet {
    /// Constructs every pool named in `config`, registers it, and launches
    /// its reconciliation loop. Does not yet serve the control interface.
    pub async fn start(
        config: &Config,
        config_path: PathBuf,
        pools_root: PathBuf,
        image_store: SharedImageStore,
        credential_issuer: Arc<dyn CredentialIssuer>,
        hypervisor: Arc<dyn Hypervisor>,
    ) -> Result<Arc<Self>, Error> {
        let fleet = Arc::new(Self {
            pools: Mutex::new(HashMap::new()),
            pools_root,
            config_path,
            image_store,
            credential_issuer,
            hypervisor,
        });

        for pool_config in &config.pools {
            fleet.spawn_pool(pool_config.clone()).await?;
        }

        metrics::POOL_TOTAL.set(config.pools.len() as i64);
        info!(count = config.pools.len(), "fleet started");
        Ok(fleet)
    }

    async fn spawn_pool(&self, pool_config: PoolConfig) -> Result<(), Error> {
        let pool = Pool::new(
            pool_config,
            &self.pools_root,
            self.image_store.clone(),
            self.credential_issuer.clone(),
            self.hypervisor.clone(),
        )
        .await?;

        pool.start();

        let mut pools = self.pools.lock().await;
        pools.insert(pool.name.clone(), pool);
        Ok(())
    }

    /// Stops every pool concurrently and waits for all to finish. Does not
    /// itself bound the wait; the control interface applies the 60s drain
    /// budget around closing its listener (spec §5).
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<Pool>> = self.pools.lock().await.values().cloned().collect();

        let mut joins = tokio::task::JoinSet::new();
        for pool in pools {
            joins.spawn(async move { pool.stop().await });
        }
        while joins.join_next().await.is_some() {}

        info!("fleet shutdown complete");
    }
}

#[async_trait::async_trait]
impl PoolManager for Fleet {
    async fn list_pools(&self) -> Vec<PoolStatus> {
        self.pools.lock().await.values().map(|pool| pool.status()).collect()
    }

    async fn get_pool(&self, name: &str) -> Result<PoolStatus, Error> {
        let pools = self.pools.lock().await;
        let pool = pools.get(name).ok_or(Error::PoolNotFound)?;
        Ok(pool.status())
    }

    async fn scale_pool(&self, name: &str, delta: i64) -> Result<(), Error> {
        let pool = {
            let pools = self.pools.lock().await;
            pools.get(name).cloned().ok_or(Error::PoolNotFound)?
        };
        metrics::POOL_SCALE_REQUESTS.with_label_values(&[name]).inc();
        pool.scale(delta).await
    }

    async fn pause_pool(&self, name: &str) -> Result<(), Error> {
        let pools = self.pools.lock().await;
        let pool = pools.get(name).ok_or(Error::PoolNotFound)?;
        pool.pause();
        Ok(())
    }

    async fn resume_pool(&self, name: &str) -> Result<(), Error> {
        let pools = self.pools.lock().await;
        let pool = pools.get(name).ok_or(Error::PoolNotFound)?;
        pool.resume();
        Ok(())
    }

    /// Re-reads and re-validates the configuration. Existing pool names get
    /// their config hot-swapped in place (no VM restart); new names get a
    /// freshly constructed, started pool. Pools removed from the new config
    /// are left running (spec §9 open question #1: reload never drains
    /// removed pools — see DESIGN.md).
    async fn reload(&self) -> Result<(), Error> {
        let config = Config::load_from_path(&self.config_path)?;

        for pool_config in &config.pools {
            let existing = {
                let pools = self.pools.lock().await;
                pools.get(&pool_config.name).cloned()
            };

            match existing {
                Some(pool) => pool.replace_config(pool_config.clone()),
                None => {
                    if let Err(e) = self.spawn_pool(pool_config.clone()).await {
                        warn!(pool = %pool_config.name, error = %e, "failed to add pool during reload");
                        return Err(e);
                    }
                }
            }
        }

        metrics::POOL_TOTAL.set(config.pools.len() as i64);
        info!("fleet configuration reloaded");
        Ok(())
    }

    async fn route_job_queued(&self, event_labels: &[String]) -> Result<(), Error> {
        let matched = {
            let pools = self.pools.lock().await;
            pools
                .values()
                .find(|pool| crate::labels::is_subset(&pool.labels(), event_labels))
                .cloned()
        };

        match matched {
            Some(pool) => pool.scale(1).await,
            None => Ok(()),
        }
    }
}
