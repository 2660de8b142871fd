//! Keyhold agent entry point.
//!
//! Loads the configuration, connects to the host application, puts the host
//! into "suppress unless a rule says otherwise" mode, installs the configured
//! presets, and holds them until Ctrl-C.  On shutdown the presets are
//! removed again and the host is left with empty lists.
//!
//! # Usage
//!
//! ```text
//! keyhold-agent [OPTIONS] [COMMAND]
//!
//! Commands:
//!   run      Install presets on the host and hold them until Ctrl-C [default]
//!   preview  Print the lists the host would receive, as JSON, without connecting
//!
//! Options:
//!   --config     <PATH>  Config file [default: platform config dir]
//!   --host       <ADDR>  Host address, overrides [host].address
//!   --timeout-ms <MS>    Reply timeout, overrides [host].timeout_ms
//! ```
//!
//! | Variable             | Overrides        |
//! |----------------------|------------------|
//! | `KEYHOLD_CONFIG`     | `--config`       |
//! | `KEYHOLD_HOST`       | `--host`         |
//! | `KEYHOLD_TIMEOUT_MS` | `--timeout-ms`   |
//! | `RUST_LOG`           | `[agent].log_level` |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keyhold_agent::application::commit_policies::{PolicyCommitService, PolicySink};
use keyhold_agent::application::presets::{install_presets, uninstall_presets};
use keyhold_agent::infrastructure::host_sink::{RecordingSink, StreamSink};
use keyhold_agent::infrastructure::storage::config::{load_config, load_config_from, AgentConfig, ConfigError};
use keyhold_core::{Category, PolicyStore};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Keyhold agent.
///
/// Commits keyboard and pointer propagation policies to a host application.
#[derive(Debug, Parser)]
#[command(
    name = "keyhold-agent",
    about = "Installs input propagation policies on a host application",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "KEYHOLD_CONFIG")]
    config: Option<PathBuf>,

    /// Host address (`host:port`).
    #[arg(long, env = "KEYHOLD_HOST")]
    host: Option<String>,

    /// Connect and reply timeout in milliseconds.
    #[arg(long, env = "KEYHOLD_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Install presets on the host and hold them until Ctrl-C.
    Run,
    /// Print the lists the host would receive, as JSON, without connecting.
    Preview,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails validation.
    fn load_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match load_config() {
                Err(ConfigError::NoPlatformConfigDir) => AgentConfig::default(),
                other => other.context("failed to load config")?,
            },
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid command-line override")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut AgentConfig) {
        if let Some(host) = &self.host {
            config.host.address = host.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.host.timeout_ms = ms;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.agent.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Preview => preview(config).await,
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(host = %config.host.address, "Keyhold agent starting");

    let sink = StreamSink::connect(config.host.address.as_str(), config.host.timeout())
        .await
        .with_context(|| format!("failed to connect to host at {}", config.host.address))?;
    let service = PolicyCommitService::new(PolicyStore::new(), Arc::new(sink));

    service
        .run_startup_defaults()
        .await
        .context("failed to apply startup defaults")?;
    let installed = install_presets(&service, &config.presets())
        .await
        .context("failed to install presets")?;

    info!(presets = installed.len(), "policies installed.  Press Ctrl-C to release them.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    uninstall_presets(&service, &installed)
        .await
        .context("failed to release presets")?;
    if service.rollback_failures() > 0 {
        warn!(
            count = service.rollback_failures(),
            "rollback failures occurred; host state may have diverged"
        );
    }

    info!("Keyhold agent stopped");
    Ok(())
}

async fn preview(config: AgentConfig) -> anyhow::Result<()> {
    let recorder = Arc::new(RecordingSink::new());
    let sink: Arc<dyn PolicySink> = recorder.clone();
    let service = PolicyCommitService::new(PolicyStore::new(), sink);

    service.run_startup_defaults().await?;
    let installed = install_presets(&service, &config.presets()).await?;

    let report = serde_json::json!({
        "host": config.host.address,
        "default_propagation": recorder.default_mode(),
        "presets": installed
            .iter()
            .map(|p| serde_json::json!({
                "name": p.name,
                "category": p.category,
                "id": p.id,
            }))
            .collect::<Vec<_>>(),
        "keyboard": service.master_policy_list(Category::Keyboard),
        "pointer": service.master_policy_list(Category::Pointer),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
