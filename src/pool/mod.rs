// Pool Controller.
//
// Implements spec §3 (Pool/VmHandle data model), §4.4 (state machine, scale
// algorithm, reconciliation loop), and §5's lock scopes. Grounded on
// `vm/pool.rs`'s `SnapshotPool` (ticker-driven background refresh
// task, `Arc<Mutex<_>>` registry, `spawn_refresh_task`) generalized from a
// fixed-size snapshot cache into the min/max-bounded runner registry spec
// describes. `machines` is a `std::sync::Mutex` rather than a
// `tokio::sync::Mutex`: our critical section (insert/remove/enumerate) never
// awaits, so a sync mutex is the tighter match (documented in DESIGN.md).

use crate::config::PoolConfig;
use crate::credentials::CredentialIssuer;
use crate::error::Error;
use crate::image::SharedImageStore;
use crate::metrics;
use crate::naming::generate_runner_name;
use crate::types::{PoolState, PoolStatus, RunnerStatus};
use crate::vm::{self, Hypervisor, VmHandle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const TICK_PERIOD: Duration = Duration::from_secs(1);
const STOP_WAIT_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Active,
    Paused,
    Stopping,
    Terminal,
}

impl Lifecycle {
    fn as_wire_state(self) -> PoolState {
        match self {
            Lifecycle::Paused => PoolState::Paused,
            Lifecycle::Stopping | Lifecycle::Terminal => PoolState::Stopping,
            Lifecycle::Created | Lifecycle::Active => PoolState::Active,
        }
    }
}

pub struct Pool {
    pub name: String,
    config: RwLock<PoolConfig>,
    dir: PathBuf,
    active: AtomicBool,
    lifecycle: SyncMutex<Lifecycle>,
    machines: Arc<SyncMutex<HashMap<String, VmHandle>>>,
    scale_lock: AsyncMutex<()>,
    started: AtomicBool,
    stop_notify: Notify,
    loop_handle: SyncMutex<Option<JoinHandle<()>>>,
    image_store: SharedImageStore,
    credential_issuer: Arc<dyn CredentialIssuer>,
    hypervisor: Arc<dyn Hypervisor>,
}

impl Pool {
    pub async fn new(
        config: PoolConfig,
        pools_root: &std::path::Path,
        image_store: SharedImageStore,
        credential_issuer: Arc<dyn CredentialIssuer>,
        hypervisor: Arc<dyn Hypervisor>,
    ) -> Result<Arc<Self>, Error> {
        let dir = pools_root.join(&config.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(anyhow::Error::new(e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            let _ = tokio::fs::set_permissions(&dir, perms).await;
        }

        let name = config.name.clone();

        Ok(Arc::new(Self {
            name,
            config: RwLock::new(config),
            dir,
            active: AtomicBool::new(false),
            lifecycle: SyncMutex::new(Lifecycle::Created),
            machines: Arc::new(SyncMutex::new(HashMap::new())),
            scale_lock: AsyncMutex::new(()),
            started: AtomicBool::new(false),
            stop_notify: Notify::new(),
            loop_handle: SyncMutex::new(None),
            image_store,
            credential_issuer,
            hypervisor,
        }))
    }

    fn config_snapshot(&self) -> PoolConfig {
        self.config.read().expect("pool config lock poisoned").clone()
    }

    /// Hot-swaps the pool's configuration in place. No VM restart; existing
    /// machines are unaffected (spec §3's reload semantics).
    pub fn replace_config(&self, config: PoolConfig) {
        *self.config.write().expect("pool config lock poisoned") = config;
    }

    pub fn current_size(&self) -> usize {
        self.machines.lock().expect("machines lock poisoned").len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.config_snapshot().runner.labels
    }

    /// Enters the reconciliation loop. Idempotent but not re-entrant: a
    /// second call observes the already-running loop and returns immediately.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            *lifecycle = Lifecycle::Active;
        }
        self.active.store(true, Ordering::SeqCst);

        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move { pool.reconciliation_loop().await });
        *self.loop_handle.lock().expect("loop handle lock poisoned") = Some(handle);
    }

    async fn reconciliation_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_PERIOD);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.publish_gauges();

                    if !self.active.load(Ordering::SeqCst) {
                        continue;
                    }

                    let config = self.config_snapshot();
                    let cur = self.current_size() as i64;
                    let want = (config.min_runners as i64 - cur).max(0);

                    if want > 0 {
                        if let Err(e) = self.scale(want).await {
                            error!(pool = %self.name, error = %e, "reconciliation scale failed");
                        }
                    }
                }
                _ = self.stop_notify.notified() => {
                    break;
                }
            }
        }
    }

    fn publish_gauges(&self) {
        let config = self.config_snapshot();
        metrics::POOL_MAX_RUNNERS
            .with_label_values(&[&self.name])
            .set(config.max_runners as f64);
        metrics::POOL_MIN_RUNNERS
            .with_label_values(&[&self.name])
            .set(config.min_runners as f64);
        metrics::POOL_CURRENT_RUNNERS
            .with_label_values(&[&self.name])
            .set(self.current_size() as f64);
    }

    /// Scale-up request. Negative or zero delta is a no-op (spec §4.4).
    pub async fn scale(&self, delta: i64) -> Result<(), Error> {
        if delta <= 0 {
            return Ok(());
        }

        let _guard = self.scale_lock.lock().await;

        let config = self.config_snapshot();
        let cur = self.current_size() as i64;
        let desired = cur + delta;

        if desired > config.max_runners as i64
            || desired < config.min_runners as i64
            || desired == cur
        {
            return Ok(());
        }

        for _ in cur..desired {
            match self.scale_up(&config).await {
                Ok(()) => {
                    metrics::POOL_SCALE_SUCCESSES.with_label_values(&[&self.name]).inc();
                }
                Err(e) => {
                    metrics::POOL_SCALE_FAILURES.with_label_values(&[&self.name]).inc();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn scale_up(&self, config: &PoolConfig) -> Result<(), Error> {
        let runner_name = generate_runner_name(&config.runner.name_prefix);

        let launched = vm::launch(
            &self.dir,
            &config.firecracker,
            &self.image_store,
            &self.credential_issuer,
            &self.hypervisor,
            &config.runner.image_ref,
            config.runner.image_pull_policy,
            &config.runner.organization,
            config.runner.group_id,
            &config.runner.labels,
            &runner_name,
        )
        .await?;

        self.machines
            .lock()
            .expect("machines lock poisoned")
            .insert(runner_name.clone(), launched.handle);

        let machines = Arc::clone(&self.machines);
        vm::spawn_reaper(launched.reaper_ctx, move |name| {
            machines.lock().expect("machines lock poisoned").remove(name);
        });

        info!(pool = %self.name, runner_name = %runner_name, "scaled up");
        Ok(())
    }

    pub fn pause(&self) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        if matches!(*lifecycle, Lifecycle::Terminal | Lifecycle::Stopping) {
            return;
        }
        *lifecycle = Lifecycle::Paused;
        self.active.store(false, Ordering::SeqCst);
        metrics::POOL_STATUS.with_label_values(&[&self.name]).set(0.0);
    }

    pub fn resume(&self) {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        if matches!(*lifecycle, Lifecycle::Terminal | Lifecycle::Stopping) {
            return;
        }
        *lifecycle = Lifecycle::Active;
        self.active.store(true, Ordering::SeqCst);
        metrics::POOL_STATUS.with_label_values(&[&self.name]).set(1.0);
    }

    /// Signals the reconciliation loop to exit, then synchronously tears
    /// down every live VM. All VMs are torn down even if individual stops
    /// fail (spec §4.4/§5).
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            *lifecycle = Lifecycle::Stopping;
        }
        self.stop_notify.notify_one();

        let handle = self.loop_handle.lock().expect("loop handle lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let runner_names: Vec<String> = self
            .machines
            .lock()
            .expect("machines lock poisoned")
            .keys()
            .cloned()
            .collect();

        for runner_name in runner_names {
            self.stop_one(&runner_name).await;
        }

        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        *lifecycle = Lifecycle::Terminal;
    }

    /// Removes the handle from the registry and stops it outside the sync
    /// lock, since `VmHandle::stop()` awaits. The reaper spawned at scale-up
    /// time races this removal harmlessly: `HashMap::remove` is idempotent.
    async fn stop_one(&self, runner_name: &str) {
        let handle = self.machines.lock().expect("machines lock poisoned").remove(runner_name);
        if let Some(handle) = handle {
            if let Err(e) = handle.stop(STOP_WAIT_BUDGET).await {
                warn!(pool = %self.name, runner_name, error = %e, "failed to stop VM during pool stop");
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let config = self.config_snapshot();
        let lifecycle = *self.lifecycle.lock().expect("lifecycle lock poisoned");
        let machines = self.machines.lock().expect("machines lock poisoned");

        let runners = machines
            .values()
            .map(|handle| RunnerStatus {
                name: handle.runner_name.clone(),
                started_at: handle.started_at,
            })
            .collect();

        PoolStatus {
            name: self.name.clone(),
            state: lifecycle.as_wire_state(),
            cur_runners: machines.len(),
            min_runners: config.min_runners,
            max_runners: config.max_runners,
            runners,
        }
    }
}
