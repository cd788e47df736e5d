//! # Configuration Module for the Bazaar Trading Simulation
//!
//! This module handles all system configuration including the auction house
//! market parameters, trader behavior constants and simulation sizing.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Main system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub market: MarketConfig,
    pub trader: TraderConfig,
    pub simulation: SimulationConfig,
}

/// Auction house configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Auction house tick period in milliseconds
    pub tick_time_ms: u64,
    /// Fraction of trade value retained by the house
    pub sales_tax: f64,
    /// Fraction of order value charged on non-immediate orders
    pub broker_fee: f64,
    /// Exponent for market-driven role weighting
    pub role_weight_gamma: f64,
    /// Window (in ticks) for "recent" market aggregates
    pub recent_window_ticks: u32,
    /// Window (in ticks) of net supply history feeding role weights
    pub role_lookback_ticks: u32,
    /// Per-stage timeout of the registration handshake in milliseconds
    pub registration_stage_timeout_ms: u64,
    /// Maximum inbound commands drained per flush
    pub max_commands_per_flush: usize,
    /// Overall run deadline in milliseconds; 0 runs until stopped
    pub run_duration_ms: u64,
}

/// Trader agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    /// EWMA factor for cost beliefs
    pub cost_ewma_alpha: f64,
    /// Floor on any offer price
    pub min_price: f64,
    /// Floor on per-unit tracked cost
    pub min_cost: f64,
    /// Markup applied to believed cost when asking
    pub profit_margin: f64,
    /// Observed-trading-range window in trades
    pub internal_lookback: usize,
}

/// Simulation sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of AI traders spawned at startup
    pub initial_traders: u32,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl SystemConfig {
    /// Load configuration from environment variables and defaults
    pub fn load() -> Result<Self> {
        let config = Self {
            market: MarketConfig::load(),
            trader: TraderConfig::load(),
            simulation: SimulationConfig::load(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.market.tick_time_ms == 0 {
            return Err(anyhow::anyhow!("Tick period must be positive"));
        }
        if !(0.0..1.0).contains(&self.market.sales_tax) {
            return Err(anyhow::anyhow!("Sales tax must be in [0, 1)"));
        }
        if self.market.broker_fee < 0.0 {
            return Err(anyhow::anyhow!("Broker fee cannot be negative"));
        }
        if self.market.recent_window_ticks == 0 || self.market.role_lookback_ticks == 0 {
            return Err(anyhow::anyhow!("History windows must be positive"));
        }
        if !(0.0..=1.0).contains(&self.trader.cost_ewma_alpha) {
            return Err(anyhow::anyhow!("Cost EWMA alpha must be in [0, 1]"));
        }
        if self.trader.min_price <= 0.0 {
            return Err(anyhow::anyhow!("Minimum price must be positive"));
        }
        if self.trader.internal_lookback == 0 {
            return Err(anyhow::anyhow!("Trader lookback must be positive"));
        }
        Ok(())
    }
}

impl MarketConfig {
    fn load() -> Self {
        Self {
            tick_time_ms: env_parse("BAZAAR_TICK_TIME_MS", 100),
            sales_tax: env_parse("BAZAAR_SALES_TAX", 0.08),
            broker_fee: env_parse("BAZAAR_BROKER_FEE", 0.03),
            role_weight_gamma: env_parse("BAZAAR_ROLE_WEIGHT_GAMMA", -0.02),
            recent_window_ticks: env_parse("BAZAAR_RECENT_WINDOW_TICKS", 50),
            role_lookback_ticks: env_parse("BAZAAR_ROLE_LOOKBACK_TICKS", 100),
            registration_stage_timeout_ms: env_parse("BAZAAR_REGISTRATION_TIMEOUT_MS", 500),
            max_commands_per_flush: env_parse("BAZAAR_MAX_COMMANDS_PER_FLUSH", 800),
            run_duration_ms: env_parse("BAZAAR_RUN_DURATION_MS", 0),
        }
    }
}

impl TraderConfig {
    fn load() -> Self {
        Self {
            cost_ewma_alpha: env_parse("BAZAAR_COST_EWMA_ALPHA", 0.2),
            min_price: env_parse("BAZAAR_MIN_PRICE", 0.10),
            min_cost: env_parse("BAZAAR_MIN_COST", 10.0),
            profit_margin: env_parse("BAZAAR_PROFIT_MARGIN", 1.15),
            internal_lookback: env_parse("BAZAAR_INTERNAL_LOOKBACK", 50),
        }
    }
}

impl SimulationConfig {
    fn load() -> Self {
        Self {
            initial_traders: env_parse("BAZAAR_INITIAL_TRADERS", 6),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            trader: TraderConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tick_time_ms: 100,
            sales_tax: 0.08,
            broker_fee: 0.03,
            role_weight_gamma: -0.02,
            recent_window_ticks: 50,
            role_lookback_ticks: 100,
            registration_stage_timeout_ms: 500,
            max_commands_per_flush: 800,
            run_duration_ms: 0,
        }
    }
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            cost_ewma_alpha: 0.2,
            min_price: 0.10,
            min_cost: 10.0,
            profit_margin: 1.15,
            internal_lookback: 50,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { initial_traders: 6 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.market.sales_tax, 0.08);
        assert_eq!(config.market.broker_fee, 0.03);
        assert_eq!(config.trader.cost_ewma_alpha, 0.2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SystemConfig::default();
        config.market.tick_time_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SystemConfig::default();
        config.market.sales_tax = 1.5;
        assert!(config.validate().is_err());

        let mut config = SystemConfig::default();
        config.trader.min_price = 0.0;
        assert!(config.validate().is_err());
    }
}
