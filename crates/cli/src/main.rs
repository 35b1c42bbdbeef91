//! Control CLI for the I2P testnet netDb synchronization engine.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use testnet_core::config::AppConfig;
use testnet_sandbox::SandboxId;
use testnet_sync::{NetDbSync, Registry, SyncReport, SyncVerb, run_for_each};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "testnetctl")]
#[command(about = "Synchronize netDb records between I2P testnet routers")]
#[command(version)]
struct Cli {
    /// Configuration file (optional; TESTNET_* env vars override it)
    #[arg(long, env = "TESTNET_CONFIG", default_value = "config/testnet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct NodeArgs {
    /// Router container name or id (repeat for several nodes)
    #[arg(long = "node", required = true)]
    nodes: Vec<String>,

    /// Shared volume name (overrides sync.shared_volume)
    #[arg(long)]
    shared_volume: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish each node's RouterInfo into the shared netDb
    Publish {
        #[command(flatten)]
        nodes: NodeArgs,
    },

    /// Merge each node's netDb into the shared netDb
    Push {
        #[command(flatten)]
        nodes: NodeArgs,
    },

    /// Merge the shared netDb into each node's netDb
    Pull {
        #[command(flatten)]
        nodes: NodeArgs,
    },

    /// Publish, push, then pull, each as a pass over all nodes
    Sync {
        #[command(flatten)]
        nodes: NodeArgs,
    },

    /// Print a node's identity hash, netDb filename and shard
    Extract {
        /// Router container name or id
        #[arg(long)]
        node: String,

        /// RouterInfo path inside the container (overrides node.router_info_path)
        #[arg(long)]
        path: Option<String>,
    },

    /// Copy a local file into the shared volume
    Seed {
        /// Local file to copy
        #[arg(long)]
        file: PathBuf,

        /// Directory relative to the volume root (default: the root)
        #[arg(long, default_value = "")]
        dir: String,

        /// Name inside the volume (default: the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Shared volume name (overrides sync.shared_volume)
        #[arg(long)]
        shared_volume: Option<String>,
    },
}

/// Default log level from `DEBUG_TESTNET` when `RUST_LOG` is unset.
fn debug_testnet_level(value: Option<&str>) -> &'static str {
    match value.map(str::trim) {
        None | Some("") => "warn",
        Some(v) if v.eq_ignore_ascii_case("warn") => "warn",
        Some(v) if v.eq_ignore_ascii_case("error") => "error",
        Some(_) => "debug",
    }
}

fn init_tracing() {
    let fallback = debug_testnet_level(std::env::var("DEBUG_TESTNET").ok().as_deref());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", path.display());
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TESTNET_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli.config)?;
    let runtime =
        testnet_sandbox::from_config(&config.runtime).context("failed to initialize runtime")?;
    tracing::debug!(backend = runtime.backend_name(), "Sandbox runtime initialized");
    let sync = NetDbSync::new(runtime, &config);

    match cli.command {
        Commands::Publish { nodes } => run_verb(&sync, &config, SyncVerb::Publish, nodes).await,
        Commands::Push { nodes } => run_verb(&sync, &config, SyncVerb::Push, nodes).await,
        Commands::Pull { nodes } => run_verb(&sync, &config, SyncVerb::Pull, nodes).await,
        Commands::Sync { nodes } => run_verb(&sync, &config, SyncVerb::All, nodes).await,
        Commands::Extract { node, path } => {
            let node = SandboxId::new(node);
            let path = path.unwrap_or_else(|| config.node.router_info_path.clone());
            let record = sync
                .extract_identity_record(&node, &path)
                .await
                .with_context(|| format!("failed to extract identity record from {node}"))?;
            let shard = record.shard(sync.shard_scheme())?;
            println!("hash:     {}", record.encoded_hash());
            println!("filename: {}", record.filename());
            println!("shard:    {shard}");
            Ok(())
        }
        Commands::Seed {
            file,
            dir,
            name,
            shared_volume,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("cannot derive a file name, pass --name")?,
            };
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let volume = shared_volume.unwrap_or_else(|| config.sync.shared_volume.clone());
            sync.seed_volume_file(&volume, &dir, &name, Bytes::from(data))
                .await
                .with_context(|| format!("failed to seed {name} into {volume}"))?;
            println!("seeded {name} into {volume}");
            Ok(())
        }
    }
}

async fn run_verb(sync: &NetDbSync, config: &AppConfig, verb: SyncVerb, args: NodeArgs) -> Result<()> {
    let volume = args
        .shared_volume
        .unwrap_or_else(|| config.sync.shared_volume.clone());
    let mut registry = Registry::new(volume);
    for node in args.nodes {
        if !registry.register(SandboxId::new(node.as_str())) {
            tracing::warn!(node = %node, "Node listed more than once, ignoring duplicate");
        }
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current node");
            signal_token.cancel();
        }
    });

    let report = run_for_each(sync, &registry, verb, &cancel).await;
    print_report(verb, &report);

    if report.cancelled {
        anyhow::bail!("{verb} cancelled after {} operations", report.attempted);
    }
    if !report.failures.is_empty() {
        anyhow::bail!(
            "{} of {} {verb} operations failed",
            report.failures.len(),
            report.attempted
        );
    }
    Ok(())
}

fn print_report(verb: SyncVerb, report: &SyncReport) {
    for failure in &report.failures {
        println!(
            "FAILED {} {}: [{}] {}",
            failure.verb,
            failure.node,
            failure.error.code(),
            failure.error
        );
    }
    println!(
        "{verb}: {}/{} succeeded",
        report.succeeded, report.attempted
    );
}
