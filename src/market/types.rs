//! # Auction House Types
//!
//! Book-side order representations and the per-offer result
//! accumulators that back the fill reports sent to traders.

use crate::types::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A buy offer owned by the bid book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidOffer {
    pub request_id: Uuid,
    pub sender_id: EntityId,
    pub commodity: String,
    pub quantity: Quantity,
    pub unit_price: Price,
    pub expiry_ms: i64,
}

/// A sell offer owned by the ask book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskOffer {
    pub request_id: Uuid,
    pub sender_id: EntityId,
    pub commodity: String,
    pub quantity: Quantity,
    pub unit_price: Price,
    pub expiry_ms: i64,
}

impl From<OfferRequest> for BidOffer {
    fn from(request: OfferRequest) -> Self {
        Self {
            request_id: request.request_id,
            sender_id: request.sender_id,
            commodity: request.commodity,
            quantity: request.quantity,
            unit_price: request.unit_price,
            expiry_ms: request.expiry_ms,
        }
    }
}

impl From<OfferRequest> for AskOffer {
    fn from(request: OfferRequest) -> Self {
        Self {
            request_id: request.request_id,
            sender_id: request.sender_id,
            commodity: request.commodity,
            quantity: request.quantity,
            unit_price: request.unit_price,
            expiry_ms: request.expiry_ms,
        }
    }
}

/// Mutable accumulator tracking what happened to one bid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidResult {
    pub sender_id: EntityId,
    pub commodity: String,
    pub quantity_traded: Quantity,
    pub quantity_untraded: Quantity,
    /// Volume-weighted clearing price paid
    pub bought_price: Price,
    pub broker_fee_paid: bool,
}

impl BidResult {
    pub fn new(sender_id: EntityId, commodity: &str) -> Self {
        Self {
            sender_id,
            commodity: commodity.to_string(),
            quantity_traded: 0,
            quantity_untraded: 0,
            bought_price: 0.0,
            broker_fee_paid: false,
        }
    }

    pub fn update_with_trade(&mut self, quantity: Quantity, clearing_price: Price) {
        let traded = self.quantity_traded as f64;
        let added = quantity as f64;
        self.bought_price = (self.bought_price * traded + clearing_price * added) / (traded + added);
        self.quantity_traded += quantity;
    }

    pub fn update_with_no_trade(&mut self, remaining: Quantity) {
        self.quantity_untraded = remaining;
    }

    pub fn into_report(self) -> BidReport {
        BidReport {
            commodity: self.commodity,
            quantity_traded: self.quantity_traded,
            quantity_untraded: self.quantity_untraded,
            bought_price: self.bought_price,
            broker_fee_paid: self.broker_fee_paid,
        }
    }
}

/// Mutable accumulator tracking what happened to one ask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResult {
    pub sender_id: EntityId,
    pub commodity: String,
    pub quantity_traded: Quantity,
    pub quantity_untraded: Quantity,
    /// Volume-weighted clearing price received
    pub avg_price: Price,
    pub broker_fee_paid: bool,
}

impl AskResult {
    pub fn new(sender_id: EntityId, commodity: &str) -> Self {
        Self {
            sender_id,
            commodity: commodity.to_string(),
            quantity_traded: 0,
            quantity_untraded: 0,
            avg_price: 0.0,
            broker_fee_paid: false,
        }
    }

    pub fn update_with_trade(&mut self, quantity: Quantity, clearing_price: Price) {
        let traded = self.quantity_traded as f64;
        let added = quantity as f64;
        self.avg_price = (self.avg_price * traded + clearing_price * added) / (traded + added);
        self.quantity_traded += quantity;
    }

    pub fn update_with_no_trade(&mut self, remaining: Quantity) {
        self.quantity_untraded = remaining;
    }

    pub fn into_report(self) -> AskReport {
        AskReport {
            commodity: self.commodity,
            quantity_traded: self.quantity_traded,
            quantity_untraded: self.quantity_untraded,
            avg_price: self.avg_price,
            broker_fee_paid: self.broker_fee_paid,
        }
    }
}

/// A fill report ready to be sent back to its offer's sender
#[derive(Debug, Clone, PartialEq)]
pub enum OfferReport {
    Bid { sender_id: EntityId, report: BidReport },
    Ask { sender_id: EntityId, report: AskReport },
}

impl OfferReport {
    pub fn sender_id(&self) -> EntityId {
        match self {
            OfferReport::Bid { sender_id, .. } | OfferReport::Ask { sender_id, .. } => *sender_id,
        }
    }
}

/// Per-tick accumulators for one commodity's resolution
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickStats {
    pub trades: i64,
    pub units_traded: i64,
    pub money_traded: f64,
    /// Volume-weighted average clearing price
    pub avg_price: f64,
    /// Volume-weighted average bid unit price of executed trades
    pub avg_buy_price: f64,
    /// Validated ask quantity entering the tick
    pub supply: f64,
    /// Validated bid quantity entering the tick
    pub demand: f64,
}

impl TickStats {
    pub fn record_trade(&mut self, quantity: Quantity, clearing_price: Price, bid_price: Price) {
        let units = self.units_traded as f64;
        let added = quantity as f64;
        self.avg_price = (self.avg_price * units + clearing_price * added) / (units + added);
        self.avg_buy_price = (self.avg_buy_price * units + bid_price * added) / (units + added);
        self.units_traded += quantity;
        self.money_traded += added * clearing_price;
        self.trades += 1;
    }
}
