//! # Commodity Beliefs
//!
//! A trader's internal price model: per-commodity target holdings and
//! cost beliefs updated from production results, plus the observed
//! trading range fed by fill reports.

use crate::types::{Price, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Multiplier base for depressing the perceived value of overproduced
/// goods, encouraging the trader to sell them off
const OVERPRODUCTION_DECAY: f64 = 1.3;

/// Belief about a single commodity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommodityBelief {
    /// Target holding
    pub ideal: Quantity,
    /// Believed per-unit cost
    pub cost: Price,
}

/// The full belief table of one trader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommodityBeliefs {
    beliefs: HashMap<String, CommodityBelief>,
}

impl CommodityBeliefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialise_belief(&mut self, commodity: &str, ideal: Quantity, cost: Price) {
        self.beliefs
            .insert(commodity.to_string(), CommodityBelief { ideal, cost });
    }

    /// Names of every commodity the trader has beliefs about
    pub fn commodities(&self) -> Vec<String> {
        self.beliefs.keys().cloned().collect()
    }

    pub fn ideal_of(&self, commodity: &str) -> Quantity {
        self.beliefs.get(commodity).map(|b| b.ideal).unwrap_or(0)
    }

    pub fn cost_of(&self, commodity: &str) -> Price {
        self.beliefs.get(commodity).map(|b| b.cost).unwrap_or(0.0)
    }

    /// Fold a production result into the cost belief: one EWMA step per
    /// produced unit, seeding an uninitialised belief first
    pub fn update_cost_from_production(
        &mut self,
        commodity: &str,
        quantity: Quantity,
        unit_price: Price,
        alpha: f64,
    ) {
        let Some(belief) = self.beliefs.get_mut(commodity) else {
            return;
        };
        if unit_price <= 0.0 {
            return;
        }
        if belief.cost == 0.0 {
            belief.cost = unit_price;
        }
        for _ in 0..quantity {
            belief.cost = alpha * unit_price + (1.0 - alpha) * belief.cost;
        }
    }

    /// Depress the cost belief of a commodity that overflowed capacity
    pub fn depress_cost(&mut self, commodity: &str, overproduced: Quantity) {
        if let Some(belief) = self.beliefs.get_mut(commodity) {
            belief.cost *= OVERPRODUCTION_DECAY.powi(-(overproduced as i32));
        }
    }
}

/// Where a value sits inside [min, max], clamped to [0, 1]
pub fn position_in_range(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Bounded per-commodity deque of recently reported trade prices
#[derive(Debug, Clone, Default)]
pub struct ObservedTradingRange {
    ranges: HashMap<String, VecDeque<Price>>,
    lookback: usize,
}

impl ObservedTradingRange {
    pub fn new(lookback: usize) -> Self {
        Self {
            ranges: HashMap::new(),
            lookback,
        }
    }

    /// Record one traded unit at `price`
    pub fn record(&mut self, commodity: &str, price: Price) {
        let prices = self.ranges.entry(commodity.to_string()).or_default();
        prices.push_back(price);
        while prices.len() > self.lookback {
            prices.pop_front();
        }
    }

    /// Record `quantity` traded units at `price`
    pub fn record_trades(&mut self, commodity: &str, quantity: Quantity, price: Price) {
        for _ in 0..quantity {
            self.record(commodity, price);
        }
    }

    /// Min and max over the retained window, `None` before any trade
    pub fn range(&self, commodity: &str) -> Option<(Price, Price)> {
        let prices = self.ranges.get(commodity)?;
        if prices.is_empty() {
            return None;
        }
        let mut min = prices[0];
        let mut max = prices[0];
        for price in prices.iter() {
            min = min.min(*price);
            max = max.max(*price);
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_seeded_then_ewma_per_unit() {
        let mut beliefs = CommodityBeliefs::new();
        beliefs.initialise_belief("food", 0, 0.0);

        beliefs.update_cost_from_production("food", 1, 10.0, 0.2);
        // seeded to 10, then one EWMA step leaves it at 10
        assert!((beliefs.cost_of("food") - 10.0).abs() < 1e-9);

        beliefs.update_cost_from_production("food", 2, 20.0, 0.2);
        // two steps: 10 -> 12 -> 13.6
        assert!((beliefs.cost_of("food") - 13.6).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_commodity_updates_are_ignored() {
        let mut beliefs = CommodityBeliefs::new();
        beliefs.update_cost_from_production("ore", 5, 10.0, 0.2);
        assert_eq!(beliefs.cost_of("ore"), 0.0);
        assert_eq!(beliefs.ideal_of("ore"), 0);
    }

    #[test]
    fn test_overproduction_depresses_cost() {
        let mut beliefs = CommodityBeliefs::new();
        beliefs.initialise_belief("wood", 0, 13.0);
        beliefs.depress_cost("wood", 2);
        assert!((beliefs.cost_of("wood") - 13.0 / 1.69).abs() < 1e-9);
    }

    #[test]
    fn test_position_in_range_clamps() {
        assert_eq!(position_in_range(5.0, 0.0, 10.0), 0.5);
        assert_eq!(position_in_range(-1.0, 0.0, 10.0), 0.0);
        assert_eq!(position_in_range(11.0, 0.0, 10.0), 1.0);
        // degenerate range
        assert_eq!(position_in_range(5.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_observed_range_tracks_min_max_and_evicts() {
        let mut observed = ObservedTradingRange::new(3);
        assert_eq!(observed.range("metal"), None);

        observed.record_trades("metal", 2, 4.0);
        observed.record("metal", 9.0);
        assert_eq!(observed.range("metal"), Some((4.0, 9.0)));

        // a fourth sample evicts the oldest 4.0
        observed.record("metal", 6.0);
        assert_eq!(observed.range("metal"), Some((4.0, 9.0)));
        observed.record("metal", 7.0);
        assert_eq!(observed.range("metal"), Some((6.0, 9.0)));
    }
}
