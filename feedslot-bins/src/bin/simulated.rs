//! Feedslot against the SIMULATED venue
//!
//! WARNING: prices are a random walk and fills are synthetic. No broker
//! connection is made.
//!
//! Useful for exercising the scheduler, scanners and monitoring end to end:
//! the venue enforces its own feed limit, streams ticks for every open feed
//! and fills (or rejects) orders after a configurable latency.

use anyhow::Result;
use clap::Parser;
use feedslot_bins::common::{init_logging, load_config, run_session, CommonArgs};
use feedslot_core::gateway::SimulatedGateway;
use feedslot_core::resilience::install_panic_handler;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;
    install_panic_handler();

    info!("=== Feedslot: SIMULATED venue ===");
    warn!("SIMULATED VENUE - synthetic prices and fills, no broker connection");
    info!(
        universe = config.gateway.simulated.universe.len(),
        seeded_positions = config.gateway.simulated.positions.len(),
        feed_limit = config.gateway.simulated.feed_limit,
        "Venue parameters"
    );

    let gateway = SimulatedGateway::new(&config.gateway.simulated);
    run_session(config, gateway, args.dump_snapshot.as_deref()).await
}
