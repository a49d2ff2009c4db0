//! Greenhouse telemetry broker binary.
//!
//! Binds a TCP port, accepts sensor node and control panel connections, and
//! runs until a shutdown signal arrives.

use clap::Parser;
use greenhouse_broker::{validate_port, ServerHarness, DEFAULT_PORT};
use tracing::{error, info};

/// Broker command line arguments.
#[derive(Parser, Debug)]
#[command(name = "greenhouse-broker")]
#[command(about = "Pub/sub message broker for simulated greenhouse telemetry")]
struct Args {
    /// TCP port to listen on. Overrides `BROKER_PORT` and the built-in default.
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let port = resolve_port(args.port);
    if !validate_port(port) {
        error!(port, "configured port is outside the allowed range 1024..=49151");
        std::process::exit(1);
    }

    info!(port, "starting greenhouse-broker");

    let harness = ServerHarness::new();
    harness.start(port).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    harness.stop().await;

    info!("shutdown complete");
    Ok(())
}

/// Resolves the listening port: explicit `--port` flag, else `BROKER_PORT`
/// environment variable, else the built-in default. An unset or
/// unparseable `BROKER_PORT` falls through to the default rather than
/// erroring.
fn resolve_port(explicit: Option<u16>) -> u16 {
    explicit.unwrap_or_else(|| {
        std::env::var("BROKER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    })
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("greenhouse_broker=debug,greenhouse_broker_bin=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_wins_over_env() {
        assert_eq!(resolve_port(Some(8080)), 8080);
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        unsafe {
            std::env::remove_var("BROKER_PORT");
        }
        assert_eq!(resolve_port(None), DEFAULT_PORT);
    }
}
