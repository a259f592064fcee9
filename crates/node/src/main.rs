//! `cl-node`: reference ClawLink node.
//!
//! Attaches this machine to a gateway, advertises canvas/screen (plus camera
//! and location when enabled), and serves `system.which` and
//! `system.notify`.  Everything else it advertises answers `UNAVAILABLE`.
//!
//! # Config
//!
//! TOML at `--config`, `CL_NODE_CONFIG`, or `<config dir>/clawlink/node.toml`:
//!
//! ```toml
//! [node]
//! display_name = "Workshop PC"
//!
//! [[gateways]]
//! url = "wss://gateway.local:18789"
//! token_env = "CL_GATEWAY_TOKEN"
//! ```
//!
//! # Trust
//!
//! `wss://` gateways are pinned on first use.  When a gateway's certificate
//! changes the node stops connecting to it; run `cl-node trust forget
//! <host:port>` after verifying the new certificate.

mod cli;
mod commands;
mod probe;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cl_node_sdk::config::{ConfigSeverity, NodeConfig};
use cl_node_sdk::{FileTrustStore, NodeModeCoordinatorBuilder, NodeStatus, SharedSettings};

use crate::cli::{Cli, Command, ConfigCommand, TrustCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_arg = cli.config.as_deref();

    match cli.command {
        None | Some(Command::Run) => {
            init_tracing(cli.json_logs);
            let (config, config_path) = cli::load_config(config_arg)?;
            tracing::info!(config = %config_path.display(), "loaded config");
            run_node(config).await
        }
        Some(Command::Caps) => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            cli::caps(&config);
            Ok(())
        }
        Some(Command::Trust(TrustCommand::List)) => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            cli::trust_list(&config);
            Ok(())
        }
        Some(Command::Trust(TrustCommand::Forget { store_key })) => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            cli::trust_forget(&config, &store_key)
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            init_cli_tracing();
            let (config, config_path) = cli::load_config(config_arg)?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            cli::show(&config)
        }
        Some(Command::Version) => {
            println!("cl-node {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Long-running tracing: `RUST_LOG` (default `info`), text or JSON lines.
fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Compact stderr tracing for one-shot commands so stdout stays clean.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Log config issues; refuse to run when any of them is an error.
fn check_config(config: &NodeConfig) -> anyhow::Result<()> {
    let mut errors = 0;
    for issue in config.validate() {
        if issue.severity == ConfigSeverity::Error {
            tracing::error!(%issue, "config error");
            errors += 1;
        } else {
            tracing::warn!(%issue, "config issue");
        }
    }
    if errors > 0 {
        anyhow::bail!("{errors} config error(s); run `cl-node config validate` for details");
    }
    Ok(())
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    check_config(&config)?;

    let (endpoints, preferences) = config.known_gateways();
    let settings = SharedSettings::new(config.settings.clone());
    let router = commands::router();
    tracing::info!(commands = ?router.command_names(), "registered commands");

    let coordinator = NodeModeCoordinatorBuilder::new()
        .endpoints(endpoints)
        .preferences(preferences)
        .handler(router)
        .trust_store(FileTrustStore::new(config.trust_store_path()))
        .permissions(probe::HostPermissions::new(config.static_permissions()))
        .settings(settings)
        .identity(config.identity())
        .session_settings(config.session.to_settings())
        .reconnect_backoff(config.reconnect.to_backoff())
        .build()?;

    // ── Status feed ─────────────────────────────────────────────────
    let mut status = coordinator.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match current {
                NodeStatus::TrustFailure { store_key } => tracing::error!(
                    store_key = %store_key,
                    "gateway certificate changed; run `cl-node trust forget {store_key}` once verified"
                ),
                NodeStatus::NotConfigured => {
                    tracing::warn!("no gateway configured; add a [[gateways]] entry")
                }
                other => tracing::debug!(status = ?other, "node status"),
            }
        }
    });

    // ── Run ─────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received, shutting down");
        shutdown_clone.cancel();
    });

    tracing::info!(
        client_id = %config.node.client_id,
        display_name = %config.node.display_name,
        gateways = config.gateways.len(),
        "starting cl-node"
    );
    coordinator.run_until(shutdown).await;
    tracing::info!("node exited cleanly");
    Ok(())
}
