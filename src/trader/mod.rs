//! # AI Trader
//!
//! An autonomous trader worker: it registers with the auction house,
//! requests production every tick, keeps a belief model of commodity
//! costs, and posts asks for its surplus and desperation-priced bids
//! for its shortages.

pub mod beliefs;

use self::beliefs::{position_in_range, CommodityBeliefs, ObservedTradingRange};
use crate::config::TraderConfig;
use crate::fabric::{CommandEnvelope, Fabric};
use crate::market::roles;
use crate::types::*;
use crate::utils::{self, SystemError, SystemResult};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Trader lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TraderStatus {
    Uninitialised = 0,
    Active = 1,
    PendingDestruction = 2,
    Destroyed = 3,
}

impl TraderStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TraderStatus::Active,
            2 => TraderStatus::PendingDestruction,
            3 => TraderStatus::Destroyed,
            _ => TraderStatus::Uninitialised,
        }
    }
}

/// Urgency factor scaling a bid price upward as cash reserves shrink
/// relative to the idle tax and holdings fall below the ideal
fn desperation(cash: Cash, idle_tax: Cash, fulfillment: f64) -> f64 {
    let days_savings = cash / idle_tax;
    let mut desperation = 1.0;
    desperation *= 5.0 / (days_savings * days_savings) + 1.0;
    desperation *= 1.0 - (0.4 * (fulfillment - 0.5)) / (1.0 + 0.4 * (fulfillment - 0.5).abs());
    desperation
}

/// How many units to bid for: scale the shortage by how favorable the
/// price is within the observed trading range
fn determine_buy_quantity(
    observed: &ObservedTradingRange,
    commodity: &str,
    bid_price: Price,
    shortage: Quantity,
) -> Quantity {
    let Some((min, max)) = observed.range(commodity) else {
        debug!("No trading range observed for {} yet", commodity);
        return 0;
    };
    let favorability = 1.0 - position_in_range(bid_price, min, max);
    (favorability * shortage as f64).ceil() as Quantity
}

struct TraderState {
    role: Role,
    beliefs: CommodityBeliefs,
    observed: ObservedTradingRange,
    tracked_costs: f64,
    idle_tax: Cash,
    ticks: u64,
    rng: StdRng,
}

enum PlannedOffer {
    Bid(OfferRequest),
    Ask(OfferRequest),
}

/// An autonomous AI trader worker
pub struct AiTrader {
    config: TraderConfig,
    tick_time_ms: u64,
    fabric: Arc<Fabric>,
    auction_house_id: EntityId,
    worker_id: WorkerId,
    requested_role: Role,
    inbox: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<CommandEnvelope>>>,
    state: Mutex<TraderState>,
    status: AtomicU8,
    entity_id: AtomicI64,
}

impl AiTrader {
    pub fn new(
        fabric: Arc<Fabric>,
        auction_house_id: EntityId,
        requested_role: Role,
        tick_time_ms: u64,
        config: TraderConfig,
    ) -> Arc<Self> {
        let (worker_id, inbox) = fabric.register_worker();
        Arc::new(Self {
            state: Mutex::new(TraderState {
                role: requested_role,
                beliefs: CommodityBeliefs::new(),
                observed: ObservedTradingRange::new(config.internal_lookback),
                tracked_costs: 0.0,
                idle_tax: roles::IDLE_TAX,
                ticks: 0,
                rng: StdRng::from_os_rng(),
            }),
            config,
            tick_time_ms,
            fabric,
            auction_house_id,
            worker_id,
            requested_role,
            inbox: tokio::sync::Mutex::new(Some(inbox)),
            status: AtomicU8::new(TraderStatus::Uninitialised as u8),
            entity_id: AtomicI64::new(-1),
        })
    }

    pub fn status(&self) -> TraderStatus {
        TraderStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: TraderStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    /// Entity id assigned at registration, -1 before
    pub fn entity_id(&self) -> EntityId {
        self.entity_id.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> Role {
        self.state.lock().expect("trader lock poisoned").role
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().expect("trader lock poisoned").ticks
    }

    /// Run the reserve-create-delegate handshake against the auction
    /// house and seed beliefs for the assigned role
    pub async fn register(&self) -> SystemResult<RegisterResponse> {
        let request = CommandRequest::Register(RegisterRequest {
            agent_type: AgentType::AiTrader,
            requested_role: self.requested_role,
        });
        let response = self
            .fabric
            .send_command(
                self.auction_house_id,
                self.worker_id,
                request,
                Duration::from_millis(5_000),
            )
            .await?;
        let CommandResponse::Registered(registered) = response else {
            return Err(SystemError::Registration(
                "unexpected response to register command".to_string(),
            ));
        };

        self.entity_id.store(registered.entity_id, Ordering::SeqCst);

        // seed price beliefs from the published listings
        let mut commodities = HashMap::new();
        let mut seed_prices = HashMap::new();
        for commodity in &registered.listed_commodities {
            if let Some(listing) = self.fabric.read_listing(self.auction_house_id, &commodity.name)
            {
                seed_prices.insert(commodity.name.clone(), listing.price_info.recent_price);
            }
            commodities.insert(commodity.name.clone(), commodity.clone());
        }

        {
            let mut state = self.state.lock().expect("trader lock poisoned");
            state.role = registered.assigned_role;
            if let Some(blueprint) =
                roles::blueprint_for(registered.assigned_role, &commodities, &seed_prices)
            {
                state.idle_tax = blueprint.buildings.idle_tax;
                for (name, ideal, cost) in blueprint.belief_seeds {
                    state.beliefs.initialise_belief(&name, ideal, cost);
                }
            }
        }

        self.set_status(TraderStatus::Active);
        info!(
            "Trader registered as {} (entity #{})",
            registered.assigned_role, registered.entity_id
        );
        Ok(registered)
    }

    /// Start the trader's tick loop
    pub async fn start(self: &Arc<Self>) -> SystemResult<()> {
        let trader = self.clone();
        tokio::spawn(async move {
            trader.run().await;
        });
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        // stagger starts so trader load does not arrive in lockstep
        let offset_ms = {
            let mut state = self.state.lock().expect("trader lock poisoned");
            state.rng.random_range(0..self.tick_time_ms.max(1))
        };
        tokio::time::sleep(Duration::from_millis(offset_ms)).await;

        if let Err(error) = self.register().await {
            warn!("Trader registration failed: {}", error);
            self.set_status(TraderStatus::Destroyed);
            return;
        }

        let mut inbox = match self.inbox.lock().await.take() {
            Some(inbox) => inbox,
            None => {
                self.set_status(TraderStatus::Destroyed);
                return;
            }
        };

        debug!("Trader {} beginning tick loop", self.entity_id());
        let tick = Duration::from_millis(self.tick_time_ms);
        while self.status() == TraderStatus::Active {
            let started = Instant::now();

            self.drain_reports(&mut inbox);
            self.production_step().await;
            if self.status() != TraderStatus::Active {
                break;
            }

            let commodities = {
                let state = self.state.lock().expect("trader lock poisoned");
                state.beliefs.commodities()
            };
            for commodity in commodities {
                for offer in self.build_offers(&commodity) {
                    self.send_offer(offer).await;
                }
            }

            {
                let mut state = self.state.lock().expect("trader lock poisoned");
                state.ticks += 1;
            }

            let elapsed = started.elapsed();
            if elapsed < tick {
                tokio::time::sleep(tick - elapsed).await;
            } else {
                warn!(
                    "Trader {} overran tick {}: took {:?}/{:?}",
                    self.entity_id(),
                    self.ticks(),
                    elapsed,
                    tick
                );
            }
        }
        debug!("Trader {} tick loop ended", self.entity_id());
    }

    /// Fold queued fill reports into the observed trading range
    fn drain_reports(&self, inbox: &mut mpsc::UnboundedReceiver<CommandEnvelope>) {
        while let Ok(envelope) = inbox.try_recv() {
            match envelope.request.clone() {
                CommandRequest::ReportBidOffer(report) => {
                    let mut state = self.state.lock().expect("trader lock poisoned");
                    state.observed.record_trades(
                        &report.commodity,
                        report.quantity_traded,
                        report.bought_price,
                    );
                    envelope.respond(Ok(CommandResponse::ReportAck(true)));
                }
                CommandRequest::ReportAskOffer(report) => {
                    let mut state = self.state.lock().expect("trader lock poisoned");
                    state.observed.record_trades(
                        &report.commodity,
                        report.quantity_traded,
                        report.avg_price,
                    );
                    envelope.respond(Ok(CommandResponse::ReportAck(true)));
                }
                other => {
                    envelope.respond(Err(SystemError::Internal(format!(
                        "trader cannot serve {:?}",
                        other
                    ))));
                }
            }
        }
    }

    /// Ask the house to run production, then update beliefs or shut down
    async fn production_step(&self) {
        let request = CommandRequest::RequestProduction(ProductionRequest {
            sender_id: self.entity_id(),
        });
        let timeout = Duration::from_millis((self.tick_time_ms * 2).max(500));
        match self
            .fabric
            .send_command(self.auction_house_id, self.worker_id, request, timeout)
            .await
        {
            Ok(CommandResponse::Production(response)) => {
                if response.bankrupt {
                    info!("Trader {} is bankrupt, requesting shutdown", self.entity_id());
                    self.request_shutdown().await;
                } else {
                    self.update_beliefs(&response);
                }
            }
            Ok(_) => warn!("Unexpected response to production request"),
            Err(error) => debug!("Production request failed: {}", error),
        }
    }

    /// Distribute tracked input costs over this tick's output
    fn update_beliefs(&self, response: &ProductionResponse) {
        let cash = self
            .fabric
            .read_inventory(self.entity_id())
            .map(|inv| inv.cash)
            .unwrap_or(0.0);

        let mut state = self.state.lock().expect("trader lock poisoned");
        let consumed_value: f64 = response
            .consumed
            .iter()
            .map(|(commodity, quantity)| *quantity as f64 * state.beliefs.cost_of(commodity))
            .sum();
        state.tracked_costs += consumed_value;

        let total_produced: Quantity = response.produced.values().sum();
        if total_produced <= 0 {
            return;
        }

        // the richer the trader, the higher its floor on perceived costs
        let costs = state
            .tracked_costs
            .max(cash / 50.0)
            .max(self.config.min_cost);
        let unit_price = costs / total_produced as f64;
        for (commodity, quantity) in &response.produced {
            state.beliefs.update_cost_from_production(
                commodity,
                *quantity,
                unit_price,
                self.config.cost_ewma_alpha,
            );
        }
        for (commodity, overproduced) in &response.overproduced {
            state.beliefs.depress_cost(commodity, *overproduced);
        }
        state.tracked_costs = 0.0;
    }

    /// Plan this tick's offers for one commodity: an ask for any surplus
    /// and a desperation-priced bid for any shortage that fits
    fn build_offers(&self, commodity: &str) -> Vec<PlannedOffer> {
        let entity_id = self.entity_id();
        let Some(inventory) = self.fabric.read_inventory(entity_id) else {
            return Vec::new();
        };
        let Some(listing) = self.fabric.read_listing(self.auction_house_id, commodity) else {
            warn!("No market listing for {}, skipping offers", commodity);
            return Vec::new();
        };
        let market_price = listing.price_info.recent_price;
        let unit_size = listing.commodity.unit_size;
        let now = utils::now_ms();
        let expiry_ms = now + self.tick_time_ms as i64;

        let mut state = self.state.lock().expect("trader lock poisoned");
        let mut offers = Vec::new();

        let held = inventory.quantity_of(commodity);
        let ideal = state.beliefs.ideal_of(commodity);

        let surplus = (held - ideal).max(0);
        if surplus >= 1 {
            let fair_price = state.beliefs.cost_of(commodity) * self.config.profit_margin;
            let (low, high) = if fair_price <= market_price {
                (fair_price, market_price)
            } else {
                (market_price, fair_price)
            };
            let sampled = if high > low {
                state.rng.random_range(low..high)
            } else {
                low
            };
            let unit_price = sampled.max(self.config.min_price);
            offers.push(PlannedOffer::Ask(OfferRequest {
                request_id: utils::generate_request_id(),
                sender_id: entity_id,
                commodity: commodity.to_string(),
                quantity: surplus,
                unit_price,
                expiry_ms,
            }));
        }

        let shortage = (ideal - held).max(0);
        let space = inventory.free_space();
        let mut fulfillment = held as f64 / (0.001 + ideal as f64);
        if matches!(state.role, Role::Refiner | Role::Blacksmith) {
            fulfillment = fulfillment.max(0.5);
        }

        if fulfillment < 1.0 && space >= unit_size {
            let max_limit = shortage.min((space / unit_size).floor() as Quantity);
            if max_limit > 0 {
                let min_limit = if held == 0 { 1 } else { 0 };
                let urgency = desperation(inventory.cash, state.idle_tax, fulfillment);
                let unit_price = (market_price * urgency)
                    .min(inventory.cash)
                    .max(self.config.min_price);
                let wanted =
                    determine_buy_quantity(&state.observed, commodity, unit_price, shortage);
                let quantity = wanted.min(max_limit).max(min_limit);
                if quantity > 0 {
                    offers.push(PlannedOffer::Bid(OfferRequest {
                        request_id: utils::generate_request_id(),
                        sender_id: entity_id,
                        commodity: commodity.to_string(),
                        quantity,
                        unit_price,
                        expiry_ms,
                    }));
                }
            }
        }
        offers
    }

    async fn send_offer(&self, offer: PlannedOffer) {
        let timeout = Duration::from_millis((self.tick_time_ms * 2).max(500));
        let request = match offer {
            PlannedOffer::Bid(request) => CommandRequest::MakeBidOffer(request),
            PlannedOffer::Ask(request) => CommandRequest::MakeAskOffer(request),
        };
        if let Err(error) = self
            .fabric
            .send_command(self.auction_house_id, self.worker_id, request, timeout)
            .await
        {
            debug!("Offer rejected: {}", error);
        }
    }

    /// Ask the house to reap this trader
    pub async fn request_shutdown(&self) {
        self.set_status(TraderStatus::PendingDestruction);
        let request = CommandRequest::RequestShutdown(ShutdownRequest {
            entity_id: self.entity_id(),
            role: self.role(),
            age_ticks: self.ticks() as i64,
        });
        match self
            .fabric
            .send_command(
                self.auction_house_id,
                self.worker_id,
                request,
                Duration::from_millis(5_000),
            )
            .await
        {
            Ok(CommandResponse::ShutdownAck(ack)) if ack.ack => {
                info!("Trader {} destroyed", self.entity_id());
            }
            other => warn!("Shutdown acknowledgement missing: {:?}", other),
        }
        self.set_status(TraderStatus::Destroyed);
    }

    /// Stop the tick loop locally without the shutdown handshake
    pub fn halt(&self) {
        self.set_status(TraderStatus::Destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desperation_grows_as_savings_shrink() {
        // 5 days of savings at neutral fulfillment
        let comfortable = desperation(100.0, 20.0, 0.5);
        assert!((comfortable - 1.2).abs() < 1e-9);

        // 1 day of savings is six times as urgent
        let broke = desperation(20.0, 20.0, 0.5);
        assert!((broke - 6.0).abs() < 1e-9);
        assert!(broke > comfortable);
    }

    #[test]
    fn test_desperation_rises_when_holdings_are_empty() {
        let empty = desperation(100.0, 20.0, 0.0);
        let full = desperation(100.0, 20.0, 1.0);
        // 1.2 * (1 + 0.2/1.2) vs 1.2 * (1 - 0.2/1.2)
        assert!((empty - 1.4).abs() < 1e-9);
        assert!((full - 1.0).abs() < 1e-9);
        assert!(empty > full);
    }

    #[test]
    fn test_determine_buy_quantity_scales_with_favorability() {
        let mut observed = ObservedTradingRange::new(50);
        observed.record("wood", 4.0);
        observed.record("wood", 9.0);

        // mid-range price buys half the shortage
        assert_eq!(determine_buy_quantity(&observed, "wood", 6.5, 4), 2);
        // bargain price buys the whole shortage
        assert_eq!(determine_buy_quantity(&observed, "wood", 4.0, 4), 4);
        // top-of-range price buys nothing
        assert_eq!(determine_buy_quantity(&observed, "wood", 9.0, 4), 0);
        // no observations yet
        let empty = ObservedTradingRange::new(50);
        assert_eq!(determine_buy_quantity(&empty, "wood", 5.0, 4), 0);
    }
}
