//! TenderLens Daemon - long-running service for the analysis platform
//!
//! This daemon provides:
//! - REST API server for document analysis and comparison
//! - Background pipeline execution with polling endpoints
//! - Report generation
//!
//! Usage:
//!   tenderlens-daemon [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Path to configuration file (default: tenderlens.toml)
//!   --host <HOST>        API server host (default: 127.0.0.1)
//!   --port <PORT>        API server port (default: 8080)
//!   --log-file <PATH>    Log file path

use std::path::PathBuf;
use std::sync::Arc;
use tenderlens::api::{start_server, AppState};
use tenderlens::{AnalysisConfig, AnalysisContext, Orchestrator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct DaemonConfig {
    config_path: PathBuf,
    host: String,
    port: u16,
    log_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("tenderlens.toml"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_file: None,
        }
    }
}

fn parse_args() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = args.next() {
                    config.config_path = PathBuf::from(path);
                }
            }
            "--host" => {
                if let Some(host) = args.next() {
                    config.host = host;
                }
            }
            "--port" => {
                if let Some(port) = args.next() {
                    if let Ok(p) = port.parse() {
                        config.port = p;
                    }
                }
            }
            "--log-file" => {
                if let Some(path) = args.next() {
                    config.log_file = Some(PathBuf::from(path));
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(2);
            }
        }
    }

    config
}

fn print_help() {
    println!("TenderLens Daemon - analysis platform service");
    println!();
    println!("USAGE:");
    println!("    tenderlens-daemon [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>      Path to configuration file (default: tenderlens.toml)");
    println!("    --host <HOST>        API server host (default: 127.0.0.1)");
    println!("    --port <PORT>        API server port (default: 8080)");
    println!("    --log-file <PATH>    Log file path");
    println!("    --help, -h           Print this help message");
}

fn init_logging(daemon: &DaemonConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &daemon.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("Failed to open log file");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let daemon = parse_args();
    init_logging(&daemon);

    let config = if daemon.config_path.exists() {
        AnalysisConfig::from_file(&daemon.config_path)?
    } else {
        info!(
            "No configuration at {}, using defaults",
            daemon.config_path.display()
        );
        AnalysisConfig::default()
    };
    let data_root = config.data_root.clone();

    let ctx = AnalysisContext::initialize(config).await?;
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(ctx))?);
    let state = AppState::new(orchestrator, &data_root)?;

    info!("Starting TenderLens daemon v{}", tenderlens::VERSION);
    start_server(state, &daemon.host, daemon.port).await
}
