mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rpc::Server;
use runtime::{Service, open_adapter};
use tracing::{error, info};

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "policyd.toml";

#[derive(Parser)]
#[command(name = "policyd")]
#[command(about = "Policy enforcement server speaking JSON-RPC", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Address to listen on (overrides server.listen)
    #[arg(short, long)]
    listen: Option<String>,

    /// Adapter driver: file or sqlite (overrides adapter.driver)
    #[arg(long)]
    driver: Option<String>,

    /// Adapter connection string (overrides adapter.connection)
    #[arg(long)]
    connection: Option<String>,

    /// Require the adapter database to exist already
    #[arg(long)]
    db_specified: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cli=debug,rpc=debug,runtime=debug,storage=debug,policy=debug"
    } else {
        "cli=info,rpc=info,runtime=info,storage=warn,policy=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(driver) = cli.driver {
        config.adapter.driver = driver;
    }
    if let Some(connection) = cli.connection {
        config.adapter.connection = connection;
    }
    if cli.db_specified {
        config.adapter.db_specified = true;
    }

    let adapter = open_adapter(
        &config.adapter.driver,
        &config.adapter.connection,
        config.adapter.db_specified,
    )
    .map_err(Error::AdapterInit)?;

    let service = Arc::new(Service::new(adapter));
    let server = Server::bind(config.server.listen.as_str(), service).await?;
    info!(version = env!("CARGO_PKG_VERSION"), "policyd started");

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
