// VM launch configuration.
//
// Grounded on `vm/config.rs` (a `VmConfig` struct with a
// `to_firecracker_json` serializer) generalized from a single hardcoded
// drive/kernel pair to the full per-pool, per-runner configuration spec
// §4.3 describes: one root drive, one tap network interface, MMDS v2, and
// the `fireactions` metadata overlay grafted under the user's template.

use crate::config::{FirecrackerConfig, MetadataValue};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct Drive {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    pub iface_id: String,
    pub host_dev_name: String,
    pub guest_mac: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineConfiguration {
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
    pub ht_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct VmLaunchConfig {
    pub runner_name: String,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    pub binary_path: PathBuf,
    pub kernel_image_path: PathBuf,
    pub kernel_args: String,
    pub machine_config: MachineConfiguration,
    pub root_drive: Drive,
    pub network_interface: NetworkInterface,
    /// Fully-resolved MMDS tree, deep-cloned from the pool's template with
    /// the per-VM `fireactions` overlay already grafted in.
    pub metadata: serde_json::Value,
}

impl VmLaunchConfig {
    /// Builds the `latest.meta-data` tree: the pool's user-supplied template
    /// deep-cloned (via a serialize/deserialize round trip, following the
    /// established pattern of cloning through JSON) plus the `fireactions`
    /// overlay. The
    /// overlay must never mutate the configured template, since the template
    /// is shared across every VM in the pool.
    pub fn build_metadata(
        template: &HashMap<String, MetadataValue>,
        runner_id: &str,
        runner_jit_config: &str,
    ) -> serde_json::Value {
        let mut meta_data = serde_json::to_value(template)
            .and_then(serde_json::from_value::<serde_json::Value>)
            .unwrap_or_else(|_| serde_json::json!({}));

        if !meta_data.is_object() {
            meta_data = serde_json::json!({});
        }

        meta_data["fireactions"] = serde_json::json!({
            "runner_id": runner_id,
            "runner_jit_config": runner_jit_config,
        });

        meta_data
    }

    pub fn new(
        pool_dir: &std::path::Path,
        firecracker: &FirecrackerConfig,
        runner_name: &str,
        root_drive_source: PathBuf,
        runner_jit_config: &str,
    ) -> Self {
        let metadata = Self::build_metadata(&firecracker.metadata, runner_name, runner_jit_config);

        Self {
            runner_name: runner_name.to_string(),
            socket_path: pool_dir.join(format!("{}.sock", runner_name)),
            log_path: pool_dir.join(format!("{}.log", runner_name)),
            binary_path: PathBuf::from(&firecracker.binary_path),
            kernel_image_path: PathBuf::from(&firecracker.kernel_image_path),
            kernel_args: firecracker.kernel_args.clone(),
            machine_config: MachineConfiguration {
                vcpu_count: firecracker.machine_config.vcpu_count,
                mem_size_mib: firecracker.machine_config.mem_mib,
                ht_enabled: false,
            },
            root_drive: Drive {
                drive_id: "rootfs".to_string(),
                path_on_host: root_drive_source,
                is_root_device: true,
                is_read_only: false,
            },
            network_interface: NetworkInterface {
                iface_id: "eth0".to_string(),
                host_dev_name: format!("tap-{}", &runner_name[..runner_name.len().min(8)]),
                guest_mac: None,
            },
            metadata,
        }
    }
}
