// VM Launcher.
//
// Implements spec §4.3's scale-up pipeline (image pull → snapshot → config
// build → credential issue → boot, which opens the VM's log file as its
// stdio sink) and the reaper task (wait exit → deregister → release lease →
// close log → remove socket). Grounded on
// `vm/firecracker.rs`'s retry-loop-to-socket-ready pattern, generalized to the
// full pipeline; the reaper itself has no direct counterpart to generalize
// from (VMs were previously stopped synchronously from the caller) and is
// modeled per spec §9's "coroutine-style reaper" redesign hint: a
// supervised, not detached, task.

use crate::config::{FirecrackerConfig, ImagePullPolicy};
use crate::credentials::CredentialIssuer;
use crate::error::Error;
use crate::image::{ImageStore, SharedImageStore};
use crate::vm::config::VmLaunchConfig;
use crate::vm::hypervisor::{Hypervisor, VmInstance};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Owned exclusively by its Pool; created at successful launch, removed by
/// the per-VM reaper on VM exit (spec §3).
pub struct VmHandle {
    pub runner_name: String,
    pub socket_path: PathBuf,
    pub lease_id: String,
    pub snapshot_id: String,
    pub started_at: DateTime<Utc>,
    instance: Arc<AsyncMutex<Box<dyn VmInstance>>>,
}

impl VmHandle {
    /// Best-effort stop with the given per-VM wait budget. Used by
    /// `Pool::stop()`; the reaper observes the resulting exit independently.
    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        let mut instance = self.instance.lock().await;
        tokio::time::timeout(timeout, instance.stop())
            .await
            .map_err(|_| anyhow::anyhow!("timed out stopping VM {}", self.runner_name))??;
        Ok(())
    }
}

/// State the reaper task needs that does not belong on the long-lived
/// `VmHandle` (the running instance handle, the log and socket paths, a
/// reference to the image store to release the lease).
pub struct ReaperContext {
    instance: Arc<AsyncMutex<Box<dyn VmInstance>>>,
    runner_name: String,
    lease_id: String,
    log_path: PathBuf,
    socket_path: PathBuf,
    image_store: SharedImageStore,
}

pub struct Launched {
    pub handle: VmHandle,
    pub reaper_ctx: ReaperContext,
}

/// Runs the scale-up pipeline for a single replica. Each step bubbles up its
/// error without partial state: nothing is registered until the VM has
/// actually started.
#[allow(clippy::too_many_arguments)]
pub async fn launch(
    pool_dir: &std::path::Path,
    firecracker: &FirecrackerConfig,
    image_store: &SharedImageStore,
    credential_issuer: &Arc<dyn CredentialIssuer>,
    hypervisor: &Arc<dyn Hypervisor>,
    image_ref: &str,
    image_pull_policy: ImagePullPolicy,
    organization: &str,
    group_id: i64,
    labels: &[String],
    runner_name: &str,
) -> Result<Launched, Error> {
    let image = image_store.get_or_pull(image_ref, image_pull_policy).await?;

    let snapshot_id = runner_name.to_string();
    let mounts = image_store.prepare_snapshot(&image, &snapshot_id).await?;
    let root_drive_source = mounts
        .first()
        .ok_or_else(|| Error::SnapshotFailed {
            snapshot_id: snapshot_id.clone(),
            source: anyhow::anyhow!("snapshot prepare returned no mounts"),
        })?
        .source
        .clone();

    let boot_token = credential_issuer
        .issue_jit_config(organization, runner_name, group_id, labels)
        .await?;

    let launch_config = VmLaunchConfig::new(
        pool_dir,
        firecracker,
        runner_name,
        root_drive_source,
        &boot_token.0,
    );

    let instance = hypervisor
        .spawn(&launch_config)
        .await
        .map_err(Error::VmStartFailed)?;

    let instance = Arc::new(AsyncMutex::new(instance));

    let handle = VmHandle {
        runner_name: runner_name.to_string(),
        socket_path: launch_config.socket_path.clone(),
        lease_id: snapshot_id.clone(),
        snapshot_id: snapshot_id.clone(),
        started_at: Utc::now(),
        instance: instance.clone(),
    };

    let reaper_ctx = ReaperContext {
        instance,
        runner_name: runner_name.to_string(),
        lease_id: snapshot_id,
        log_path: launch_config.log_path.clone(),
        socket_path: launch_config.socket_path.clone(),
        image_store: image_store.clone(),
    };

    Ok(Launched { handle, reaper_ctx })
}

const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns the reaper task: waits for the VM process to exit, deregisters it
/// from the pool (via `on_exit`), releases the snapshot lease with a 5s
/// timeout (not-found tolerated), and closes the log file and removes the
/// socket file. Every error is logged and never propagated, per spec §7.
pub fn spawn_reaper(
    ctx: ReaperContext,
    on_exit: impl Fn(&str) + Send + Sync + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        {
            let mut instance = ctx.instance.lock().await;
            if let Err(e) = instance.wait().await {
                warn!(runner_name = %ctx.runner_name, error = %e, "VM process wait failed");
            }
        }

        on_exit(&ctx.runner_name);

        match tokio::time::timeout(RELEASE_TIMEOUT, ctx.image_store.release_snapshot(&ctx.lease_id))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(runner_name = %ctx.runner_name, error = %e, "failed to release snapshot lease"),
            Err(_) => warn!(runner_name = %ctx.runner_name, "timed out releasing snapshot lease"),
        }

        if ctx.log_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&ctx.log_path).await {
                warn!(runner_name = %ctx.runner_name, error = %e, "failed to close VM log file");
            }
        }

        if ctx.socket_path.exists() {
            if let Err(e) = tokio::fs::remove_file(&ctx.socket_path).await {
                warn!(runner_name = %ctx.runner_name, error = %e, "failed to remove VM socket file");
            }
        }

        info!(runner_name = %ctx.runner_name, "VM reaped");
    })
}
