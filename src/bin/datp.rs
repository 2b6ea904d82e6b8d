//! DATP daemon binary
//!
//! Loads configuration and runs one node (aggregator, collector or
//! source) until Ctrl+C.

use clap::Parser;
use datp::{Config, Node, Role};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Data Aggregation Transport Protocol node
#[derive(Parser, Debug)]
#[command(name = "datp", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Role to run, overriding `node.role`
    #[arg(short, long, value_name = "ROLE", value_parser = parse_role)]
    role: Option<Role>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    dump_config: bool,
}

fn parse_role(s: &str) -> Result<Role, String> {
    match s {
        "aggregator" => Ok(Role::Aggregator),
        "collector" => Ok(Role::Collector),
        "source" => Ok(Role::Source),
        other => Err(format!(
            "unknown role '{}' (expected aggregator, collector or source)",
            other
        )),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("DATP starting");

    // Load configuration
    info!("Loading configuration");
    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        // Explicit config file specified - load only that file
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        // Use default search paths
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if let Some(role) = args.role {
        config.node.get_or_insert_with(Default::default).role = role;
    }

    if args.dump_config {
        match config.to_yaml() {
            Ok(yaml) => {
                print!("{}", yaml);
                return;
            }
            Err(e) => {
                error!("Failed to serialize configuration: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Create node
    info!(role = %config.role(), "Creating node");
    let mut node = match Node::new(config) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.start().await {
        error!("Failed to start node: {}", e);
        std::process::exit(1);
    }

    info!("DATP running, press Ctrl+C to exit");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    };

    if let Err(e) = node.run_rx_loop(shutdown).await {
        error!("RX event loop failed: {}", e);
    }

    info!("DATP shutting down");

    if let Err(e) = node.stop().await {
        warn!("Error during shutdown: {}", e);
    }

    info!("DATP shutdown complete");
}
