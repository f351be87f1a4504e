// fireactions CLI entry point.
//
// Grounded on `original_source/commands/cmd.go`: global `--endpoint`,
// `--username`, `--password` flags; `server`, `runner`, `reload`, and
// `pools {list|show|pause|resume|scale}` subcommands. `clap` derive
// generalizes `main.rs`'s `run`/`spawn-vm`/`test-mcp` subcommand layout.

mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::ApiClient;
use fireactions::config::Config;
use fireactions::credentials::GithubCredentialIssuer;
use fireactions::fleet::{Fleet, PoolManager};
use fireactions::image::ImageGateway;
use fireactions::vm::FirecrackerHypervisor;
use fireactions::{http, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fireactions")]
#[command(version)]
#[command(about = "Control plane for pools of ephemeral Firecracker micro-VM CI runners")]
struct Cli {
    /// Endpoint to use for communicating with the fireactions API.
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:8080")]
    endpoint: String,

    /// Username for authenticating with the fireactions API.
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Password for authenticating with the fireactions API.
    #[arg(short, long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server.
    Server {
        /// Configuration file path.
        #[arg(short = 'f', long, default_value = "/etc/fireactions/config.yaml")]
        config: PathBuf,
    },
    /// Starts the virtual machine runner. Must be run inside the guest.
    Runner {
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },
    /// Reload the server with its latest configuration (no downtime).
    Reload,
    #[command(subcommand)]
    Pools(PoolsCommand),
}

#[derive(Subcommand, Debug)]
enum PoolsCommand {
    /// List all pools.
    List,
    /// Retrieve a specific pool by name.
    Show { name: String },
    /// Pause a pool, preventing it from scaling up.
    Pause { name: String },
    /// Resume a paused pool.
    Resume { name: String },
    /// Scale a pool by one or more replicas.
    Scale {
        name: String,
        #[arg(long, default_value_t = 1)]
        replicas: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "fireactions exiting with an error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Server { config } => run_server(&config).await,
        Commands::Runner { log_level } => run_runner(&log_level),
        Commands::Reload => {
            let client = ApiClient::new(cli.endpoint, cli.username, cli.password);
            client.reload().await
        }
        Commands::Pools(cmd) => run_pools(cli.endpoint, cli.username, cli.password, cmd).await,
    }
}

async fn run_server(config_path: &PathBuf) -> Result<()> {
    let config = Config::load_from_path(config_path).context("loading configuration")?;
    logging::init(config.log_level());
    fireactions::metrics::init().context("initializing metrics")?;
    fireactions::metrics::SERVER_UP.set(1);

    info!(config_path = %config_path.display(), "starting fireactions server");

    let image_store = Arc::new(ImageGateway::new(
        PathBuf::from("/var/lib/fireactions/cache"),
        PathBuf::from("/var/lib/fireactions/snapshots"),
    ));
    let credential_issuer = Arc::new(GithubCredentialIssuer::new(
        config.github.app_id,
        config.github.app_private_key.clone(),
    ));
    let hypervisor = Arc::new(FirecrackerHypervisor);

    let fleet = Fleet::start(
        &config,
        config_path.clone(),
        PathBuf::from("/var/lib/fireactions/pools"),
        image_store,
        credential_issuer,
        hypervisor,
    )
    .await
    .context("starting fleet")?;

    let pool_manager: Arc<dyn PoolManager> = fleet.clone();

    let shutdown = tokio::sync::Notify::new();
    let shutdown = Arc::new(shutdown);

    let control_shutdown = {
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    };

    let metrics_task = if config.metrics.enabled {
        let address = config.metrics.address.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let metrics_shutdown = async move { shutdown.notified().await };
            if let Err(e) = fireactions::metrics_server::serve(&address, metrics_shutdown).await {
                error!(error = %e, "metrics server exited with an error");
            }
        }))
    } else {
        None
    };

    // Stop every pool (and wait for all of them) before the control
    // interface starts its own drain, per spec §5: fan-out to pools
    // concurrently, fan-in to a barrier, then stop the control interface
    // with a 60s drain.
    let signal_task = {
        let shutdown = shutdown.clone();
        let fleet = fleet.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining pools");
            fleet.shutdown().await;
            shutdown.notify_waiters();
        })
    };

    let result = http::serve(&config, pool_manager, control_shutdown).await;

    signal_task.abort();
    shutdown.notify_waiters();
    if let Some(task) = metrics_task {
        let _ = task.await;
    }

    fireactions::metrics::SERVER_UP.set(0);

    result
}

fn run_runner(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" | "fatal" | "panic" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    logging::init(level);

    // The in-guest runner agent (MMDS token fetch, JIT registration, job
    // execution) is a collaborator boundary, not reimplemented here.
    Err(anyhow::anyhow!(
        "the in-guest runner agent is outside this control plane's scope"
    ))
}

async fn run_pools(
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    cmd: PoolsCommand,
) -> Result<()> {
    let client = ApiClient::new(endpoint, username, password);

    match cmd {
        PoolsCommand::List => {
            let pools = client.list_pools().await?;
            println!("{}", serde_json::to_string_pretty(&pools)?);
        }
        PoolsCommand::Show { name } => {
            let pool = client.get_pool(&name).await?;
            println!("{}", serde_json::to_string_pretty(&pool)?);
        }
        PoolsCommand::Pause { name } => {
            client.pause_pool(&name).await?;
            println!("Pool \"{name}\" paused");
        }
        PoolsCommand::Resume { name } => {
            client.resume_pool(&name).await?;
            println!("Pool \"{name}\" resumed");
        }
        PoolsCommand::Scale { name, replicas } => {
            for _ in 0..replicas {
                client.scale_pool(&name).await?;
                println!("Pool \"{name}\" scaled up by +1");
            }
        }
    }

    Ok(())
}
