//! Feedslot in DRY-RUN mode
//!
//! Market data, positions and PnL come from the wrapped venue; orders are
//! logged and immediately reported back as rejected, never routed.
//!
//! Until a broker adapter exists the wrapped venue is the simulated one.

use anyhow::Result;
use clap::Parser;
use feedslot_bins::common::{init_logging, load_config, run_session, CommonArgs};
use feedslot_core::gateway::{DryRunGateway, SimulatedGateway};
use feedslot_core::resilience::install_panic_handler;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;
    install_panic_handler();

    info!("=== Feedslot: DRY RUN ===");
    warn!("DRY RUN - NO ORDERS WILL BE ROUTED");
    if !config.scanners.auto_trade {
        info!("Auto-trade is off; pass --auto-trade to exercise the order path");
    }

    let gateway = DryRunGateway::new(SimulatedGateway::new(&config.gateway.simulated));
    run_session(config, gateway, args.dump_snapshot.as_deref()).await
}
