use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use hublink::config::HubConfig;
use hublink::logging::{init_logging, LoggingConfig};
use hublink::manager::IntegrationManager;
use hublink::server;

#[derive(Parser, Debug)]
#[command(name = "hublink")]
#[command(version)]
#[command(about = "Integration orchestration service: endpoints, sync jobs and webhooks")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the integration service and its HTTP server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the configuration)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate a configuration file and print a summary
    CheckConfig {
        /// Path to the TOML configuration file
        path: PathBuf,
    },
}

fn logging_config(settings: &hublink::config::LogSettings, cli: &Cli) -> LoggingConfig {
    let config = LoggingConfig::from_settings(settings).with_verbosity(cli.verbose);
    let json = config.json || cli.json_logs;
    config.with_json(json)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config, port } => {
            let mut hub_config = match config {
                Some(path) => HubConfig::load(path)
                    .with_context(|| format!("failed to load configuration from {}", path.display()))?,
                None => HubConfig::default(),
            };
            if let Some(port) = port {
                hub_config.server.port = *port;
            }
            init_logging(logging_config(&hub_config.logging, &cli));
            serve(hub_config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { path } => {
            init_logging(logging_config(&Default::default(), &cli));
            match HubConfig::load(path) {
                Ok(config) => {
                    println!(
                        "Configuration OK: {} endpoints, {} sync jobs, {} webhooks, listening on {}",
                        config.endpoints.len(),
                        config.sync_jobs.len(),
                        config.webhook_registrations.len(),
                        config.server.socket_addr()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("Invalid configuration: {}", err);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

async fn serve(config: HubConfig) -> anyhow::Result<()> {
    let addr = config.server.socket_addr();
    let manager = Arc::new(IntegrationManager::new(config)?);
    manager
        .load_seeds()
        .await
        .context("failed to register configured integrations")?;

    if let Some(mut events) = manager.take_event_receiver().await {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(?event, "Integration event");
            }
        });
    }

    manager.start().await?;
    let served = server::serve(manager.clone(), &addr, shutdown_signal()).await;
    manager.stop().await?;
    served.with_context(|| format!("HTTP server on {} failed", addr))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
