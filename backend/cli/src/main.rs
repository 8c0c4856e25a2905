mod classify_cmd;
mod config_cmd;
mod status_cmd;
mod terminal_output;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use aerodesk_config::{
    config_dir, config_file_path, ensure_valid, load_effective, AeroConfig, FsAppCatalog,
};
use aerodesk_executor::{CommandExecutor, ShellConfig};
use aerodesk_gateway::{build_router, start_server, ConnectionManager, GatewayState};
use aerodesk_logging::{init_logger, LogOptions};
use aerodesk_sandbox::RiskClassifier;
use aerodesk_supervisor::{BackendSet, NativeSessionRegistry, SunshineConfig, XpraConfig};

use config_cmd::ConfigCommands;

#[derive(Parser)]
#[command(name = "aerodesk")]
#[command(about = "aerodesk: command execution gateway and native app session manager")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.aerodesk/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show whether a gateway is running and list its sessions
    Status {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show how a command would be gated
    Classify {
        command: String,
        /// Print the raw decision as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or initialise the config file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    // `config init`/`validate` must work even when the file is broken.
    if let Commands::Config(cmd @ (ConfigCommands::Init { .. } | ConfigCommands::Validate | ConfigCommands::Path)) =
        cli.command
    {
        return config_cmd::run(cmd, &config_path, &AeroConfig::default()).await;
    }

    let mut config = load_effective(&config_path).await?;

    match cli.command {
        Commands::Serve { port } => {
            init_logger(&LogOptions {
                level: config.logging.level.clone(),
                dir: config.logging.dir.clone(),
                json: config.logging.json,
            })?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            ensure_valid(&config, &config_path)?;
            run_server(config).await?;
        }
        Commands::Status { port } => {
            status_cmd::run(port.unwrap_or(config.gateway.port)).await?;
        }
        Commands::Classify { command, json } => {
            classify_cmd::run(&command, &config, json)?;
        }
        Commands::Config(cmd) => {
            config_cmd::run(cmd, &config_path, &config).await?;
        }
    }

    Ok(())
}

/// Wire every component from the effective config.
fn build_manager(config: &AeroConfig) -> ConnectionManager {
    let sessions = NativeSessionRegistry::new();

    let backends = BackendSet::standard(
        &sessions,
        config.exec.shell.clone(),
        XpraConfig {
            binary: config.xpra.binary.clone(),
            base_display: config.xpra.base_display,
            ready_timeout: Duration::from_secs(config.xpra.ready_timeout_secs),
        },
        SunshineConfig {
            binary: config.sunshine.binary.clone(),
            url: config.sunshine.url.clone(),
            settle_delay: Duration::from_millis(config.sunshine.settle_delay_ms),
        },
    );

    let executor = CommandExecutor::new(
        RiskClassifier::with_extra(
            &config.security.extra_blocked,
            &config.security.extra_risk_tokens,
        ),
        ShellConfig {
            shell: config.exec.shell.clone(),
            max_output_bytes: config.exec.max_output_bytes,
        },
    );

    ConnectionManager::new(
        sessions,
        backends,
        Arc::new(FsAppCatalog::new(config.apps.dir.clone())),
        executor,
    )
    .with_kill_on_disconnect(config.sessions.kill_on_disconnect)
}

async fn run_server(config: AeroConfig) -> Result<()> {
    info!(
        port = config.gateway.port,
        bind = %config.gateway.bind,
        apps = %config.apps.dir.display(),
        "Starting aerodesk gateway"
    );

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.gateway.bind))?;

    let state = GatewayState::new(build_manager(&config));
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    start_server(addr, app).await
}
