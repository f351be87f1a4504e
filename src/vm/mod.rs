// VM Launcher: hypervisor abstraction, Firecracker driver, and per-VM reaper.

pub mod config;
pub mod firecracker;
pub mod hypervisor;
pub mod launcher;

pub use firecracker::FirecrackerHypervisor;
pub use hypervisor::{Hypervisor, VmInstance};
pub use launcher::{launch, spawn_reaper, Launched, ReaperContext, VmHandle};
