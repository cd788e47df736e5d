//! # Trade Settlement
//!
//! Atomic cash/commodity transfers against fabric-held inventories.
//! Settlement never holds a distributed lock: a buyer-side failure is
//! repaired with a compensating write returning the goods to the seller.

use crate::fabric::Fabric;
use crate::types::*;
use log::{debug, info, warn};
use std::sync::Arc;

/// Outcome of one settlement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    SellerFail,
    BuyerFail,
}

/// Moves cash and goods between trader inventories and accrues house
/// revenue from sales tax and broker fees
pub struct SettlementEngine {
    fabric: Arc<Fabric>,
    sales_tax: f64,
    broker_fee: f64,
    /// Cumulative house revenue. Only the auction house tick path writes it.
    pub spread_profit: f64,
}

impl SettlementEngine {
    pub fn new(fabric: Arc<Fabric>, sales_tax: f64, broker_fee: f64) -> Self {
        Self {
            fabric,
            sales_tax,
            broker_fee,
            spread_profit: 0.0,
        }
    }

    /// Take up to `quantity` of a commodity from a trader. With `atomic`
    /// set, takes all or nothing. Returns the quantity taken.
    pub fn try_take_commodity(
        &self,
        trader_id: EntityId,
        commodity: &str,
        quantity: Quantity,
        atomic: bool,
    ) -> Quantity {
        if quantity <= 0 {
            return 0;
        }
        self.fabric
            .update_inventory(trader_id, |inv| {
                let available = inv.quantity_of(commodity);
                if available < quantity && atomic {
                    return 0;
                }
                let taken = available.min(quantity);
                if let Some(item) = inv.items.get_mut(commodity) {
                    item.quantity = available - taken;
                }
                taken
            })
            .unwrap_or(0)
    }

    /// Take up to `amount` cash from a trader. With `atomic` set, takes
    /// all or nothing. Returns the cash taken.
    pub fn try_take_cash(&self, trader_id: EntityId, amount: Cash, atomic: bool) -> Cash {
        if amount <= 0.0 {
            return 0.0;
        }
        self.fabric
            .update_inventory(trader_id, |inv| {
                if inv.cash < amount && atomic {
                    return 0.0;
                }
                let taken = inv.cash.min(amount);
                inv.cash -= taken;
                taken
            })
            .unwrap_or(0.0)
    }

    /// Add a commodity to a trader, capped by remaining capacity. Any
    /// overflow is lost. Returns the quantity actually stored.
    pub fn try_add_commodity(
        &self,
        trader_id: EntityId,
        commodity: &Commodity,
        quantity: Quantity,
    ) -> Quantity {
        if quantity <= 0 {
            return 0;
        }
        self.fabric
            .update_inventory(trader_id, |inv| {
                let fits = (inv.free_space() / commodity.unit_size).floor() as Quantity;
                let added = fits.max(0).min(quantity);
                let entry = inv.items.entry(commodity.name.clone()).or_insert(InventoryItem {
                    unit_size: commodity.unit_size,
                    quantity: 0,
                });
                entry.quantity += added;
                added
            })
            .unwrap_or(0)
    }

    /// Restore a commodity to a trader unconditionally. Used only for the
    /// compensating write after a buyer-side failure: goods taken from a
    /// seller must never be destroyed by a failed counterparty.
    fn restore_commodity(&self, trader_id: EntityId, commodity: &Commodity, quantity: Quantity) {
        let restored = self.fabric.update_inventory(trader_id, |inv| {
            let entry = inv.items.entry(commodity.name.clone()).or_insert(InventoryItem {
                unit_size: commodity.unit_size,
                quantity: 0,
            });
            entry.quantity += quantity;
        });
        if restored.is_err() {
            warn!(
                "Could not return {} x{} to departed trader {}",
                commodity.name, quantity, trader_id
            );
        }
    }

    /// Credit cash to a trader
    pub fn add_cash(&self, trader_id: EntityId, amount: Cash) {
        if amount <= 0.0 {
            return;
        }
        let credited = self.fabric.update_inventory(trader_id, |inv| {
            inv.cash += amount;
        });
        if credited.is_err() {
            warn!("Could not credit ${:.2} to departed trader {}", amount, trader_id);
        }
    }

    /// Execute one matched trade: goods from seller, cash from buyer,
    /// delivery capped by buyer capacity, sales tax to the house.
    pub fn settle(
        &mut self,
        commodity: &Commodity,
        buyer_id: EntityId,
        seller_id: EntityId,
        quantity: Quantity,
        clearing_price: Price,
    ) -> SettlementOutcome {
        let taken = self.try_take_commodity(seller_id, &commodity.name, quantity, true);
        if taken == 0 {
            warn!("Seller {} lacks {} x{}, aborting trade", seller_id, commodity.name, quantity);
            return SettlementOutcome::SellerFail;
        }

        let cost = taken as f64 * clearing_price;
        let paid = self.try_take_cash(buyer_id, cost, true);
        if paid == 0.0 {
            warn!("Buyer {} lacks ${:.2}, aborting trade", buyer_id, cost);
            self.restore_commodity(seller_id, commodity, taken);
            return SettlementOutcome::BuyerFail;
        }

        self.try_add_commodity(buyer_id, commodity, taken);
        self.add_cash(seller_id, cost * (1.0 - self.sales_tax));
        self.spread_profit += cost * self.sales_tax;

        info!(
            "Made trade: {} >>> {} : {} x{} @ ${:.2}",
            seller_id, buyer_id, commodity.name, taken, clearing_price
        );
        SettlementOutcome::Settled
    }

    /// Charge the broker fee on order entry. Returns true when the fee
    /// was collected; the caller records it on the offer result so it is
    /// never charged twice.
    pub fn take_broker_fee(
        &mut self,
        sender_id: EntityId,
        quantity: Quantity,
        unit_price: Price,
    ) -> bool {
        let fee = quantity as f64 * unit_price * self.broker_fee;
        if fee <= 0.0 {
            // fee-free configuration still counts as paid
            return true;
        }
        let taken = self.try_take_cash(sender_id, fee, true);
        if taken > 0.0 {
            self.spread_profit += fee;
            true
        } else {
            debug!("Trader {} could not cover broker fee ${:.2}", sender_id, fee);
            false
        }
    }
}
