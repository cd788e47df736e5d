//! # Bazaar Trading Simulation Library
//!
//! A commodity bazaar POC in which autonomous trader agents produce,
//! consume and exchange goods through a central auction house.
//!
//! ## Architecture Overview
//!
//! The system is built as layers around an in-process replication fabric:
//! - **Fabric**: entity store, atomic component updates and command routing
//! - **Market Layer**: the auction house (order books, matching, settlement,
//!   production, history, trader lifecycle)
//! - **Trader Layer**: autonomous agents with belief models and offer loops
//! - **Configuration**: environment-driven settings for both layers
//!
//! ## Usage
//!
//! ```rust
//! use bazaar_trading_sim::{BazaarTradingSystem, SystemConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SystemConfig::default(); // Use default config for testing
//!     let system = BazaarTradingSystem::new(config)?;
//!     system.start().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use log::info;
use std::sync::{Arc, Mutex};

// Public modules that form the library API
pub mod config;
pub mod fabric;
pub mod market;
pub mod trader;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::SystemConfig;
pub use types::*;
pub use utils::{SystemError, SystemResult};

use crate::fabric::Fabric;
use crate::market::AuctionHouse;
use crate::trader::AiTrader;

/// Main system context wiring the fabric, the auction house and the
/// trader workers. This is the primary entry point for using the
/// bazaar trading simulation as a library.
pub struct BazaarTradingSystem {
    config: SystemConfig,
    fabric: Arc<Fabric>,
    auction_house: Arc<AuctionHouse>,
    traders: Mutex<Vec<Arc<AiTrader>>>,
}

impl BazaarTradingSystem {
    /// Create a new simulation instance with the canonical commodity set
    pub fn new(config: SystemConfig) -> Result<Self> {
        info!("🏪 Initializing Bazaar Trading Simulation");

        let fabric = Arc::new(Fabric::new());
        let auction_house = AuctionHouse::new(fabric.clone(), config.market.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create auction house: {}", e))?;

        Ok(Self {
            config,
            fabric,
            auction_house,
            traders: Mutex::new(Vec::new()),
        })
    }

    /// Start the auction house loops and the initial trader population
    pub async fn start(&self) -> Result<()> {
        info!("⚡ Starting Bazaar Trading Simulation");

        self.auction_house
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start auction house: {}", e))?;

        for _ in 0..self.config.simulation.initial_traders {
            // unassigned traders get a market-weighted role at registration
            self.spawn_trader(Role::None).await?;
        }

        info!("✅ Bazaar Trading Simulation started successfully");
        Ok(())
    }

    /// Stop every trader and the auction house
    pub async fn stop(&self) -> Result<()> {
        info!("🛑 Stopping Bazaar Trading Simulation");

        let traders = self.traders.lock().expect("trader list lock poisoned");
        for trader in traders.iter() {
            trader.halt();
        }
        drop(traders);
        self.auction_house.stop();

        info!("✅ Bazaar Trading Simulation stopped successfully");
        Ok(())
    }

    /// Spawn one AI trader worker; `Role::None` requests market-driven
    /// role assignment
    pub async fn spawn_trader(&self, role: Role) -> Result<Arc<AiTrader>> {
        let trader = AiTrader::new(
            self.fabric.clone(),
            self.auction_house.entity_id(),
            role,
            self.config.market.tick_time_ms,
            self.config.trader.clone(),
        );
        trader
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start trader: {}", e))?;
        self.traders
            .lock()
            .expect("trader list lock poisoned")
            .push(trader.clone());
        Ok(trader)
    }

    /// Get system configuration
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Get the shared fabric reference
    pub fn fabric(&self) -> Arc<Fabric> {
        self.fabric.clone()
    }

    /// Get the auction house reference
    pub fn auction_house(&self) -> Arc<AuctionHouse> {
        self.auction_house.clone()
    }

    /// Number of trader workers spawned so far
    pub fn trader_count(&self) -> usize {
        self.traders.lock().expect("trader list lock poisoned").len()
    }
}
