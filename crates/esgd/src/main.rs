//! esgd — the ESG console daemon.
//!
//! Assembles the preference store and field identity resolver over the
//! configured Airtable base and serves the console REST API.
//!
//! # Usage
//!
//! ```text
//! esgd init-config --base-id appGtLbKhmNkkTLVL > console.toml
//! esgd serve --config console.toml --port 8080
//! esgd schema --config console.toml --table companies
//! ```

mod wiring;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use esg_core::ConsoleConfig;

#[derive(Parser)]
#[command(name = "esgd", about = "ESG console daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Path to console.toml.
        #[arg(long, default_value = "console.toml")]
        config: PathBuf,

        /// Port to listen on; overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Keep preferences and schemas in memory instead of Airtable.
        #[arg(long)]
        offline: bool,
    },
    /// Resolve and print the field mapping of one logical table.
    Schema {
        #[arg(long, default_value = "console.toml")]
        config: PathBuf,

        /// Logical table ID from the `[tables]` registry.
        #[arg(long)]
        table: String,
    },
    /// Print a starter console.toml.
    InitConfig {
        #[arg(long)]
        base_id: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,esgd=debug,esg=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            port,
            offline,
        } => run_server(config, port, offline).await,
        Command::Schema { config, table } => print_schema(config, &table).await,
        Command::InitConfig { base_id } => {
            print!("{}", ConsoleConfig::scaffold(&base_id).to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_server(config_path: PathBuf, port: Option<u16>, offline: bool) -> anyhow::Result<()> {
    let config = ConsoleConfig::from_file(&config_path)?;
    info!(path = ?config_path, base_id = %config.airtable.base_id, "configuration loaded");

    let state = if offline {
        wiring::offline_state(&config)
    } else {
        wiring::airtable_state(&config)?
    };
    info!(
        tables = state.resolver.registered_tables().len(),
        preferences_table = %state.prefs.table(),
        offline,
        "services initialized"
    );

    let router = esg_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.server.port)));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("ESG console daemon stopped");
    Ok(())
}

async fn print_schema(config_path: PathBuf, table_id: &str) -> anyhow::Result<()> {
    let config = ConsoleConfig::from_file(&config_path)?;
    let state = wiring::airtable_state(&config)?;
    match state.resolver.get_field_mapping(table_id).await? {
        Some(mapping) => {
            println!("{}", serde_json::to_string_pretty(&mapping)?);
            Ok(())
        }
        None => anyhow::bail!(
            "no field mapping for '{table_id}'; registered tables: {}",
            state.resolver.registered_tables().join(", ")
        ),
    }
}
