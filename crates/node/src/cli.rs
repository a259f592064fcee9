use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use cl_node_sdk::config::{ConfigSeverity, NodeConfig};
use cl_node_sdk::{CapabilityRegistry, FileTrustStore, TlsTrustStore};

/// ClawLink node: attaches this machine to a gateway and serves its commands.
#[derive(Debug, Parser)]
#[command(name = "cl-node", version, about)]
pub struct Cli {
    /// Path to the node config file.
    #[arg(long, global = true, env = "CL_NODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the gateway and serve invokes (default).
    Run,
    /// Print the capabilities and commands advertised with the current settings.
    Caps,
    /// Pinned gateway certificates.
    #[command(subcommand)]
    Trust(TrustCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum TrustCommand {
    /// List pinned fingerprints.
    List,
    /// Forget the pin for a `host:port` so the next connect trusts on first use.
    Forget {
        /// Store key, as shown by `trust list` or in the trust failure log.
        store_key: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults, secrets masked) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the config from `--config` / `CL_NODE_CONFIG`, else the default
/// location.  Returns the config and the path that was used.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(NodeConfig, PathBuf)> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(NodeConfig::default_path);
    let config = NodeConfig::load(&path)?;
    Ok((config, path))
}

// ── One-shot commands ─────────────────────────────────────────────────

/// Print issues; `false` when any is an error.
pub fn validate(config: &NodeConfig, config_path: &Path) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({})", config_path.display());
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {}",
        error_count,
        warning_count,
        config_path.display()
    );

    error_count == 0
}

pub fn show(config: &NodeConfig) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(&masked(config))?;
    print!("{output}");
    Ok(())
}

fn masked(config: &NodeConfig) -> NodeConfig {
    let mut config = config.clone();
    for gw in &mut config.gateways {
        if gw.token.is_some() {
            gw.token = Some("***".into());
        }
        if gw.password.is_some() {
            gw.password = Some("***".into());
        }
    }
    config
}

pub fn caps(config: &NodeConfig) {
    let registry = CapabilityRegistry::new();
    let caps = registry.current_caps(&config.settings);
    let commands = registry.current_commands(&caps);
    println!("caps:");
    for cap in &caps {
        println!("  {cap}");
    }
    println!("commands:");
    for cmd in &commands {
        println!("  {cmd}");
    }
}

pub fn trust_list(config: &NodeConfig) {
    let store = FileTrustStore::new(config.trust_store_path());
    let entries = store.entries();
    if entries.is_empty() {
        println!("No pinned gateways ({})", store.path().display());
        return;
    }
    for (key, fingerprint) in entries {
        println!("{key}  sha256:{fingerprint}");
    }
}

pub fn trust_forget(config: &NodeConfig, store_key: &str) -> anyhow::Result<()> {
    let store = FileTrustStore::new(config.trust_store_path());
    if store.remove_fingerprint(store_key)? {
        println!("Forgot pin for {store_key}; the next connection will trust on first use.");
    } else {
        println!("No pin stored for {store_key}");
    }
    Ok(())
}
