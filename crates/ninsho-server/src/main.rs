//! ninsho - entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ninsho_core::{MemoryRouteStore, RouteStore};
use tracing::{error, info};

use ninsho_server::{ControlPlane, Server, ServerConfig, ShutdownSignal};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("ninsho {}", ninsho_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"ninsho - edge routing control plane

USAGE:
    ninsho [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    NINSHO_LISTEN_PORT           Listen port (default: 8000)
    NINSHO_MODE                  control | relay (default: control)
    NINSHO_ROUTES_FILE           JSON file to seed the route store from
    NINSHO_CADDY_ADMIN           Caddy admin API URL (default: http://caddy:2019)
    NINSHO_EDGE_PORT             Port the Caddy server listens on (default: 8080)
    NINSHO_HEALTH_CHECK_ENABLED  Run the periodic health sweep (default: true)
    NINSHO_HEALTH_CHECK_INTERVAL Seconds between sweeps, 0 disables (default: 300)
    NINSHO_UPSTREAM_SSL_VERIFY   Verify upstream TLS certificates (default: false)
    NINSHO_LOG_LEVEL             Log level filter (default: info)
    NINSHO_METRICS_ADDR          Prometheus listener address, empty disables

EXAMPLES:
    # Run with configuration file
    ninsho --config /etc/ninsho/ninsho.toml

    # Relay mode, no Caddy
    NINSHO_MODE=relay NINSHO_ROUTES_FILE=/data/routes.json ninsho
"
    );
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ServerConfig> {
    let config = match path {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    }
    .with_env_overrides();

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn RouteStore>> {
    let store = match &config.server.routes_file {
        Some(path) => MemoryRouteStore::from_json_file(path)
            .with_context(|| format!("failed to load routes from {}", path.display()))?,
        None => MemoryRouteStore::new(),
    };
    info!(routes = store.len(), "route store ready");
    Ok(Arc::new(store))
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = load_store(&config)?;
    let control = Arc::new(ControlPlane::new(&config, store)?);
    let server = Server::new(&config, Arc::clone(&control))?;

    info!(
        version = ninsho_server::VERSION,
        mode = config.server.mode.as_str(),
        addr = %server.addr(),
        "starting ninsho"
    );

    control.startup().await;
    let result = server.run(ShutdownSignal::with_os_signals()).await;
    control.shutdown().await;

    result?;
    info!("ninsho stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ninsho_telemetry::init_telemetry(&config.telemetry_config()) {
        eprintln!("failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "ninsho failed");
        std::process::exit(1);
    }
}
