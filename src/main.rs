mod analyzer;
mod cache;
mod cli;
mod config;
mod dashboard;
mod error;
mod parser;
mod perf;
mod process;
mod state;
mod watcher;

use config::Config;
use error::LookoutError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h")
        || args.first().map(|s| s.as_str()) == Some("help")
    {
        cli::print_help();
        return;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("lookout {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    match args.first().map(|s| s.as_str()) {
        Some("serve") => {
            init_tracing();
            let config = match Config::resolve(&args[1..]) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("[lookout] {e}");
                    std::process::exit(2);
                }
            };
            if let Err(e) = dashboard::run(config).await {
                eprintln!("[lookout] {e}");
                std::process::exit(exit_code_for(&e));
            }
        }
        Some(other) => {
            eprintln!("lookout: unknown command '{other}'\n");
            eprintln!("Run 'lookout help' for usage.");
            std::process::exit(1);
        }
        None => {
            cli::print_help();
        }
    }
}

fn exit_code_for(e: &LookoutError) -> i32 {
    match e {
        LookoutError::Config(_) => 2,
        LookoutError::Io(io) if io.kind() == std::io::ErrorKind::AddrInUse => 3,
        LookoutError::WatcherFailed(_) | LookoutError::SnapshotUnavailable { .. } => 4,
        _ => 1,
    }
}

fn init_tracing() {
    let level = std::env::var("LOOKOUT_LOG").unwrap_or_else(|_| "info".into());
    let filter = match level.as_str() {
        "off" | "warn" | "info" | "debug" => level,
        _ => "info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}
