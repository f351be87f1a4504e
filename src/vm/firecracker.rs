// Firecracker process supervision and API client.
//
// Grounded directly on `vm/firecracker.rs`: `FirecrackerClient`
// speaks the Firecracker HTTP API over a Unix socket via `hyper`/`hyper-util`,
// `FirecrackerProcess` owns the child process and socket path. Generalized
// from a single hardcoded boot-source/drive/machine-config PUT
// sequence to the full configuration spec §4.3 describes: root drive, tap
// network interface, MMDS v2 (token-gated) with the metadata tree.

use crate::vm::config::VmLaunchConfig;
use crate::vm::hypervisor::{Hypervisor, VmInstance};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub struct FirecrackerHypervisor;

#[async_trait]
impl Hypervisor for FirecrackerHypervisor {
    async fn spawn(&self, config: &VmLaunchConfig) -> Result<Box<dyn VmInstance>> {
        let process = start_firecracker(config).await?;
        Ok(Box::new(process))
    }

    fn name(&self) -> &str {
        "firecracker"
    }
}

pub struct FirecrackerProcess {
    pub runner_name: String,
    pub pid: u32,
    pub socket_path: String,
    child: Option<Child>,
}

#[async_trait]
impl VmInstance for FirecrackerProcess {
    fn runner_name(&self) -> &str {
        &self.runner_name
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn socket_path(&self) -> &str {
        &self.socket_path
    }

    async fn wait(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            child.wait().await.context("waiting for firecracker process")?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(runner_name = %self.runner_name, "stopping firecracker VM");

        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }

        if Path::new(&self.socket_path).exists() {
            let _ = tokio::fs::remove_file(&self.socket_path).await;
        }

        Ok(())
    }
}

/// Firecracker API client over a Unix domain socket.
pub struct FirecrackerClient {
    socket_path: String,
}

impl FirecrackerClient {
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
        }
    }

    async fn send_request<T: Serialize + ?Sized>(
        &self,
        method: &str,
        path: &str,
        body: Option<&T>,
    ) -> Result<Bytes> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .context("connecting to firecracker socket")?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("firecracker connection closed: {:?}", err);
            }
        });

        let mut req_builder = Request::builder()
            .method(method)
            .uri(path)
            .header("Host", "localhost")
            .header("Accept", "application/json");

        let request = if let Some(body_data) = body {
            req_builder = req_builder.header("Content-Type", "application/json");
            let json = serde_json::to_string(body_data)?;
            req_builder.body(Full::new(Bytes::from(json)))?
        } else {
            req_builder.body(Full::new(Bytes::new()))?
        };

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body_bytes = response.collect().await?.to_bytes();

        if status.is_success() || status == StatusCode::NO_CONTENT {
            Ok(body_bytes)
        } else {
            Err(anyhow!(
                "firecracker API error ({}): {}",
                status,
                String::from_utf8_lossy(&body_bytes)
            ))
        }
    }
}

/// Starts a Firecracker process and configures it per `config`. On any
/// failure the process is killed and no partial state is left running,
/// matching spec §4.3's abort-on-first-error scale-up semantics.
pub async fn start_firecracker(config: &VmLaunchConfig) -> Result<FirecrackerProcess> {
    let start_time = Instant::now();

    if !config.kernel_image_path.exists() {
        return Err(anyhow!("kernel image not found at: {:?}", config.kernel_image_path));
    }
    if !config.root_drive.path_on_host.exists() {
        return Err(anyhow!(
            "root drive not found at: {:?}",
            config.root_drive.path_on_host
        ));
    }

    let socket_path = config.socket_path.to_string_lossy().to_string();
    if Path::new(&socket_path).exists() {
        tokio::fs::remove_file(&socket_path)
            .await
            .context("removing stale firecracker socket")?;
    }

    // Truncate-on-create, per spec §4.3; doubles as the VM's console log sink
    // for the rest of its lifetime.
    let log_file = std::fs::File::create(&config.log_path)
        .with_context(|| format!("creating VM log file at {:?}", config.log_path))?;
    let log_file_stderr = log_file
        .try_clone()
        .context("cloning VM log file handle for stderr")?;

    let mut command = Command::new(&config.binary_path);
    command.arg("--api-sock").arg(&socket_path);
    command.stdout(std::process::Stdio::from(log_file));
    command.stderr(std::process::Stdio::from(log_file_stderr));

    let mut child = command.spawn().context("spawning firecracker process")?;
    let pid = child.id().ok_or_else(|| anyhow!("failed to read firecracker PID"))?;

    debug!(runner_name = %config.runner_name, pid, "firecracker process started");

    let mut ready = false;
    for _ in 0..50 {
        if Path::new(&socket_path).exists() {
            ready = true;
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }

    if !ready {
        let _ = child.kill().await;
        return Err(anyhow!("firecracker API socket did not appear in time"));
    }

    let client = FirecrackerClient::new(&socket_path);

    if let Err(e) = configure_vm(&client, config).await {
        let _ = child.kill().await;
        return Err(e);
    }

    if let Err(e) = start_instance(&client).await {
        let _ = child.kill().await;
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        runner_name = %config.runner_name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "VM started"
    );

    Ok(FirecrackerProcess {
        runner_name: config.runner_name.clone(),
        pid,
        socket_path,
        child: Some(child),
    })
}

async fn configure_vm(client: &FirecrackerClient, config: &VmLaunchConfig) -> Result<()> {
    let boot_source = BootSource {
        kernel_image_path: config.kernel_image_path.to_string_lossy().to_string(),
        boot_args: Some(config.kernel_args.clone()),
    };
    client.send_request("PUT", "/boot-source", Some(&boot_source)).await?;

    let drive = DriveWire {
        drive_id: config.root_drive.drive_id.clone(),
        path_on_host: config.root_drive.path_on_host.to_string_lossy().to_string(),
        is_root_device: config.root_drive.is_root_device,
        is_read_only: config.root_drive.is_read_only,
    };
    client
        .send_request("PUT", &format!("/drives/{}", drive.drive_id), Some(&drive))
        .await?;

    let machine_config = MachineConfigurationWire {
        vcpu_count: config.machine_config.vcpu_count,
        mem_size_mib: config.machine_config.mem_size_mib,
        ht_enabled: config.machine_config.ht_enabled,
    };
    client.send_request("PUT", "/machine-config", Some(&machine_config)).await?;

    let network_interface = NetworkInterfaceWire {
        iface_id: config.network_interface.iface_id.clone(),
        host_dev_name: config.network_interface.host_dev_name.clone(),
        guest_mac: config.network_interface.guest_mac.clone(),
    };
    client
        .send_request(
            "PUT",
            &format!("/network-interfaces/{}", network_interface.iface_id),
            Some(&network_interface),
        )
        .await?;

    // MMDS v2, token-gated, reachable from the tap interface.
    let mmds_config = MmdsConfigWire {
        version: "V2".to_string(),
        network_interfaces: vec![config.network_interface.iface_id.clone()],
        ipv4_address: Some("169.254.169.254".to_string()),
    };
    client.send_request("PUT", "/mmds/config", Some(&mmds_config)).await?;
    client.send_request("PUT", "/mmds", Some(&config.metadata)).await?;

    Ok(())
}

async fn start_instance(client: &FirecrackerClient) -> Result<()> {
    let action = Action {
        action_type: "InstanceStart".to_string(),
    };
    client.send_request("PUT", "/actions", Some(&action)).await?;
    Ok(())
}

#[derive(Serialize)]
struct BootSource {
    kernel_image_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    boot_args: Option<String>,
}

#[derive(Serialize)]
struct DriveWire {
    drive_id: String,
    path_on_host: String,
    is_root_device: bool,
    is_read_only: bool,
}

#[derive(Serialize)]
struct MachineConfigurationWire {
    vcpu_count: u8,
    mem_size_mib: u32,
    ht_enabled: bool,
}

#[derive(Serialize)]
struct NetworkInterfaceWire {
    iface_id: String,
    host_dev_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    guest_mac: Option<String>,
}

#[derive(Serialize)]
struct MmdsConfigWire {
    version: String,
    network_interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4_address: Option<String>,
}

#[derive(Serialize)]
struct Action {
    action_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FirecrackerConfig;
    use crate::vm::config::VmLaunchConfig;
    use std::path::PathBuf;

    #[test]
    fn wire_structs_serialize_expected_fields() {
        let boot_source = BootSource {
            kernel_image_path: "/tmp/kernel".to_string(),
            boot_args: Some("console=ttyS0".to_string()),
        };
        let json = serde_json::to_string(&boot_source).unwrap();
        assert!(json.contains("kernel_image_path"));
        assert!(json.contains("boot_args"));

        let mmds_config = MmdsConfigWire {
            version: "V2".to_string(),
            network_interfaces: vec!["eth0".to_string()],
            ipv4_address: Some("169.254.169.254".to_string()),
        };
        let json = serde_json::to_string(&mmds_config).unwrap();
        assert!(json.contains("\"version\":\"V2\""));
    }

    #[tokio::test]
    async fn missing_kernel_image_is_rejected_before_spawning() {
        let firecracker = FirecrackerConfig {
            kernel_image_path: "/non/existent/kernel".to_string(),
            ..FirecrackerConfig::default()
        };
        let config = VmLaunchConfig::new(
            std::path::Path::new("/tmp"),
            &firecracker,
            "p-test",
            PathBuf::from("/non/existent/rootfs"),
            "token",
        );
        let result = start_firecracker(&config).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("kernel image not found"));
    }
}
