// Hypervisor abstraction.
//
// Grounded on `vm/hypervisor.rs`: a narrow `Hypervisor` /
// `VmInstance` trait pair generalized from a single hardcoded VM config to
// the full `VmLaunchConfig` spec §4.3 describes.

use crate::vm::config::VmLaunchConfig;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Hypervisor: Send + Sync {
    async fn spawn(&self, config: &VmLaunchConfig) -> Result<Box<dyn VmInstance>>;
    fn name(&self) -> &str;
}

#[async_trait]
pub trait VmInstance: Send + Sync {
    fn runner_name(&self) -> &str;
    fn pid(&self) -> u32;
    fn socket_path(&self) -> &str;

    /// Blocks until the VM process exits. Used by the reaper task.
    async fn wait(&mut self) -> Result<()>;

    /// Best-effort stop; callers apply their own timeout.
    async fn stop(&mut self) -> Result<()>;
}
