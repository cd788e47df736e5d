//! # Core Types for the Bazaar Trading Simulation
//!
//! This module defines the data types shared between the auction house,
//! the trader agents and the fabric substrate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Entity identifier assigned by the fabric
pub type EntityId = i64;

/// Worker identifier (a connected process, before it owns an entity)
pub type WorkerId = i64;

/// Cash amounts
pub type Cash = f64;

/// Unit price of a commodity
pub type Price = f64;

/// Discrete commodity quantity
pub type Quantity = i64;

/// A tradeable good. Immutable once registered with the auction house.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    /// Unique name, e.g. "wood"
    pub name: String,
    /// Inventory units consumed by a single quantity unit
    pub unit_size: f64,
    /// Opaque routing tag for the commodity's market component
    pub market_id: i32,
}

impl Commodity {
    pub fn new(name: &str, unit_size: f64, market_id: i32) -> Self {
        Self {
            name: name.to_string(),
            unit_size,
            market_id,
        }
    }
}

/// Trader archetype determining default recipes and starting inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    None,
    Farmer,
    Woodcutter,
    Composter,
    Miner,
    Refiner,
    Blacksmith,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Farmer => "farmer",
            Role::Woodcutter => "woodcutter",
            Role::Composter => "composter",
            Role::Miner => "miner",
            Role::Refiner => "refiner",
            Role::Blacksmith => "blacksmith",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of agent asking to be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    Monitor,
    AiTrader,
    HumanTrader,
}

/// A single stored item inside a trader inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Inventory units per quantity unit
    pub unit_size: f64,
    /// Stored quantity
    pub quantity: Quantity,
}

/// Authoritative trader inventory, held by the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderInventory {
    /// Total inventory space
    pub capacity: f64,
    /// Liquid cash
    pub cash: Cash,
    /// Stored items keyed by commodity name
    pub items: HashMap<String, InventoryItem>,
}

impl TraderInventory {
    pub fn new(capacity: f64, cash: Cash) -> Self {
        Self {
            capacity,
            cash,
            items: HashMap::new(),
        }
    }

    /// Inventory space currently in use
    pub fn used_space(&self) -> f64 {
        self.items
            .values()
            .map(|item| item.unit_size * item.quantity as f64)
            .sum()
    }

    /// Inventory space still available
    pub fn free_space(&self) -> f64 {
        self.capacity - self.used_space()
    }

    /// Stored quantity of a commodity, 0 if absent
    pub fn quantity_of(&self, commodity: &str) -> Quantity {
        self.items.get(commodity).map(|item| item.quantity).unwrap_or(0)
    }

    /// Whether at least `quantity` of `commodity` is on hand
    pub fn has_item(&self, commodity: &str, quantity: Quantity) -> bool {
        self.quantity_of(commodity) >= quantity
    }

    /// Whether at least `amount` cash is on hand
    pub fn has_cash(&self, amount: Cash) -> bool {
        self.cash >= amount
    }
}

/// One input or output line of a production recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub commodity: String,
    pub quantity: Quantity,
    /// Probability the entry fires this tick; >= 1 means always
    pub chance: f64,
}

impl RecipeEntry {
    pub fn new(commodity: &str, quantity: Quantity, chance: f64) -> Self {
        Self {
            commodity: commodity.to_string(),
            quantity,
            chance,
        }
    }
}

/// A production recipe owned by a trader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub produces: Vec<RecipeEntry>,
    pub requires: Vec<RecipeEntry>,
    /// Lowest priority number is evaluated first
    pub priority: i32,
    pub name: String,
    pub repeatable: bool,
}

/// Trader building list component, held by the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderBuildings {
    pub buildings: Vec<Building>,
    /// Cash charged when no recipe can run
    pub idle_tax: Cash,
}

/// Per-commodity market signals published every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    /// Mean clearing price over the last tick
    pub curr_price: Price,
    /// Mean clearing price over the recent window
    pub recent_price: Price,
    pub curr_net_supply: f64,
    pub recent_net_supply: f64,
    pub recent_trade_volume: f64,
}

/// Market listing component: one per commodity on the auction house entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub commodity: Commodity,
    pub price_info: PriceInfo,
}

/// Population accounting published by the auction house
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DemographicInfo {
    pub role_counts: HashMap<Role, i64>,
    pub total_deaths: i64,
    pub average_age_ticks: f64,
}

/// Register command payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_type: AgentType,
    pub requested_role: Role,
}

/// Register command reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub entity_id: EntityId,
    pub assigned_role: Role,
    pub listed_commodities: Vec<Commodity>,
}

/// MakeBidOffer / MakeAskOffer command payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub request_id: Uuid,
    pub sender_id: EntityId,
    pub commodity: String,
    pub quantity: Quantity,
    pub unit_price: Price,
    /// Absolute epoch ms; 0 means "immediate" (valid for one resolution, fee-exempt)
    pub expiry_ms: i64,
}

/// Acknowledgement for an accepted offer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfferAck {
    pub accepted: bool,
}

/// RequestProduction command payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionRequest {
    pub sender_id: EntityId,
}

/// Outcome of one production step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductionResponse {
    pub bankrupt: bool,
    pub produced: HashMap<String, Quantity>,
    /// Quantity lost to missing capacity, per produced commodity
    pub overproduced: HashMap<String, Quantity>,
    pub consumed: HashMap<String, Quantity>,
}

/// RequestShutdown command payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub entity_id: EntityId,
    pub role: Role,
    pub age_ticks: i64,
}

/// RequestShutdown command reply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShutdownAck {
    pub ack: bool,
}

/// Fill report for a closed or partially filled bid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidReport {
    pub commodity: String,
    pub quantity_traded: Quantity,
    pub quantity_untraded: Quantity,
    pub bought_price: Price,
    pub broker_fee_paid: bool,
}

/// Fill report for a closed or partially filled ask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskReport {
    pub commodity: String,
    pub quantity_traded: Quantity,
    pub quantity_untraded: Quantity,
    pub avg_price: Price,
    pub broker_fee_paid: bool,
}

/// Commands routed through the fabric to a target entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandRequest {
    Register(RegisterRequest),
    MakeBidOffer(OfferRequest),
    MakeAskOffer(OfferRequest),
    RequestProduction(ProductionRequest),
    RequestShutdown(ShutdownRequest),
    ReportBidOffer(BidReport),
    ReportAskOffer(AskReport),
}

/// Replies carried back over the command envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResponse {
    Registered(RegisterResponse),
    OfferAck(OfferAck),
    Production(ProductionResponse),
    ShutdownAck(ShutdownAck),
    ReportAck(bool),
}
