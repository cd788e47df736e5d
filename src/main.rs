//! # Bazaar Trading Simulation Binary
//!
//! Binary executable for running the bazaar trading simulation as a
//! standalone application.

use anyhow::Result;
use bazaar_trading_sim::{BazaarTradingSystem, SystemConfig};
use log::{error, info};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    bazaar_trading_sim::utils::logging::init_logging();

    // Load environment variables
    dotenv::dotenv().ok();

    info!("🏪 Bazaar Trading Simulation v{}", env!("CARGO_PKG_VERSION"));
    info!("⚖️  Central auction house | autonomous producer-trader agents");

    // Load configuration
    let config = SystemConfig::load()?;

    // Initialize and start the simulation
    let system = BazaarTradingSystem::new(config)?;
    system.start().await?;

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("🔄 Received shutdown signal, stopping the bazaar...");
            system.stop().await?;
        }
        Err(err) => {
            error!("🚨 Unable to listen for shutdown signal: {}", err);
        }
    }

    Ok(())
}
