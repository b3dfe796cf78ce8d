//! Relay entry point
//!
//! Run with: tcp-fanout [PUBLISHER_ADDR] [LISTEN_ADDR]
//!
//! Arguments override `FANOUT_PUBLISHER` / `FANOUT_LISTEN`; log verbosity
//! comes from `RUST_LOG`, falling back to `FANOUT_LOG_LEVEL`.

use tcp_fanout::config::{parse_addr, DEFAULT_LISTEN_ADDR, DEFAULT_PUBLISHER_ADDR};
use tcp_fanout::{RelayConfig, Supervisor};

fn print_usage() {
    eprintln!("Usage: tcp-fanout [PUBLISHER_ADDR] [LISTEN_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  PUBLISHER_ADDR    Publisher to read from (default: {DEFAULT_PUBLISHER_ADDR})");
    eprintln!("  LISTEN_ADDR       Loopback address for listeners (default: {DEFAULT_LISTEN_ADDR})");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  FANOUT_PUBLISHER, FANOUT_LISTEN, FANOUT_LOG_LEVEL, RUST_LOG");
}

fn load_config(args: &[String]) -> tcp_fanout::Result<RelayConfig> {
    let mut config = RelayConfig::from_env()?;

    if let Some(arg) = args.get(1) {
        config.publisher_addr = parse_addr(arg, config.publisher_addr.port())?;
    }
    if let Some(arg) = args.get(2) {
        config.listen_addr = parse_addr(arg, config.listen_addr.port())?;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        publisher = %config.publisher_addr,
        listen = %config.listen_addr,
        "Starting relay"
    );

    let supervisor = Supervisor::new(config)?;
    supervisor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
