use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rover_udp_runtime::config::RuntimeConfig;
use rover_udp_runtime::runtime;

/// Differential-drive rover runtime: UDP drive commands in, dead-reckoned
/// pose out, watchdog-protected motors.
#[derive(Parser)]
struct Args {
    /// JSON config file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    let control = runtime::connect(&cfg).await?;
    let handle = control.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.stop().await;

    Ok(())
}
