// Shared test doubles for the pool-lifecycle integration tests.
//
// A `Hypervisor`/`VmInstance` pair whose VMs never exit until the test
// explicitly kills one by runner_name, modeling an out-of-band VM death
// (spec §8 scenario 2) without needing a real Firecracker process.

use async_trait::async_trait;
use fireactions::config::ImagePullPolicy;
use fireactions::credentials::{BootToken, CredentialIssuer};
use fireactions::error::Error;
use fireactions::image::{Image, ImageStore, Mount};
use fireactions::vm::config::VmLaunchConfig;
use fireactions::vm::{Hypervisor, VmInstance};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub struct NullImageStore;

#[async_trait]
impl ImageStore for NullImageStore {
    async fn get_or_pull(&self, image_ref: &str, _policy: ImagePullPolicy) -> Result<Image, Error> {
        Ok(Image {
            image_ref: image_ref.to_string(),
            digest: "sha256:test".to_string(),
            layer_path: PathBuf::from("/dev/null"),
        })
    }

    async fn prepare_snapshot(&self, _image: &Image, snapshot_id: &str) -> Result<Vec<Mount>, Error> {
        Ok(vec![Mount {
            source: PathBuf::from(format!("/tmp/{}", snapshot_id)),
            target: PathBuf::from("/"),
            fs_type: "ext4".to_string(),
        }])
    }

    async fn release_snapshot(&self, _lease_id: &str) -> Result<(), Error> {
        Ok(())
    }
}

pub struct NullCredentialIssuer;

#[async_trait]
impl CredentialIssuer for NullCredentialIssuer {
    async fn issue_jit_config(
        &self,
        _organization: &str,
        _runner_name: &str,
        _group_id: i64,
        _labels: &[String],
    ) -> Result<BootToken, Error> {
        Ok(BootToken("token".to_string()))
    }
}

/// Hypervisor double that keeps every spawned VM alive until `kill` is
/// called with its runner_name, or `stop()` is invoked on its handle.
#[derive(Default)]
pub struct KillSwitchHypervisor {
    notifies: Mutex<HashMap<String, Arc<Notify>>>,
}

impl KillSwitchHypervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates an out-of-band VM death: wakes that runner's `wait()`.
    pub fn kill(&self, runner_name: &str) {
        if let Some(notify) = self.notifies.lock().unwrap().get(runner_name) {
            notify.notify_one();
        }
    }
}

#[async_trait]
impl Hypervisor for KillSwitchHypervisor {
    async fn spawn(&self, config: &VmLaunchConfig) -> anyhow::Result<Box<dyn VmInstance>> {
        let notify = Arc::new(Notify::new());
        self.notifies
            .lock()
            .unwrap()
            .insert(config.runner_name.clone(), notify.clone());

        Ok(Box::new(FakeVmInstance {
            runner_name: config.runner_name.clone(),
            notify,
        }))
    }

    fn name(&self) -> &str {
        "kill-switch"
    }
}

struct FakeVmInstance {
    runner_name: String,
    notify: Arc<Notify>,
}

#[async_trait]
impl VmInstance for FakeVmInstance {
    fn runner_name(&self) -> &str {
        &self.runner_name
    }

    fn pid(&self) -> u32 {
        1
    }

    fn socket_path(&self) -> &str {
        "/dev/null"
    }

    async fn wait(&mut self) -> anyhow::Result<()> {
        self.notify.notified().await;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.notify.notify_one();
        Ok(())
    }
}
