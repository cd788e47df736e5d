//! # Auction House
//!
//! The central market service: it owns the per-commodity order books,
//! resolves them on a fixed-period tick, settles trades against
//! fabric-held inventories, runs production on behalf of traders, and
//! mints/reaps trader entities.

pub mod book;
pub mod history;
pub mod production;
pub mod roles;
pub mod settlement;
pub mod types;

use self::book::{resolve_offers, validate_offer_request, OrderBook};
use self::history::MarketHistory;
use self::production::ProductionEngine;
use self::settlement::SettlementEngine;
use self::types::OfferReport;
use crate::config::MarketConfig;
use crate::fabric::{CommandEnvelope, EntityComponents, Fabric};
use crate::types::*;
use crate::utils::{self, SystemError, SystemResult};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Registration handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RegisterProgress {
    None,
    ReservedId,
    CreatedEntity,
    AssignedPartition,
}

/// Population accounting owned by the auction house
#[derive(Debug, Default)]
struct Demographics {
    role_counts: HashMap<Role, i64>,
    total_deaths: i64,
    total_age_ticks: i64,
}

impl Demographics {
    fn increment(&mut self, role: Role) {
        *self.role_counts.entry(role).or_insert(0) += 1;
    }

    fn record_death(&mut self, role: Role, age_ticks: i64) {
        *self.role_counts.entry(role).or_insert(0) -= 1;
        self.total_deaths += 1;
        self.total_age_ticks += age_ticks;
    }

    fn to_info(&self) -> DemographicInfo {
        DemographicInfo {
            role_counts: self.role_counts.clone(),
            total_deaths: self.total_deaths,
            average_age_ticks: if self.total_deaths > 0 {
                self.total_age_ticks as f64 / self.total_deaths as f64
            } else {
                0.0
            },
        }
    }
}

/// State mutated by the tick path and guarded by a single lock
struct HouseState {
    history: MarketHistory,
    settlement: SettlementEngine,
    demographics: Demographics,
    rng: StdRng,
    ticks: u64,
}

/// The auction house service
pub struct AuctionHouse {
    config: MarketConfig,
    fabric: Arc<Fabric>,
    production: ProductionEngine,
    entity_id: EntityId,
    worker_id: WorkerId,
    unique_name: String,
    known_commodities: HashMap<String, Commodity>,
    seed_prices: HashMap<String, Price>,
    /// Commodity resolution order, fixed at construction
    commodity_order: Vec<Commodity>,
    books: RwLock<HashMap<String, Mutex<OrderBook>>>,
    state: Mutex<HouseState>,
    inbox: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<CommandEnvelope>>>,
    destroyed: AtomicBool,
}

impl AuctionHouse {
    /// Create an auction house listing the canonical commodity set
    pub fn new(fabric: Arc<Fabric>, config: MarketConfig) -> SystemResult<Arc<Self>> {
        Self::with_commodities(fabric, config, roles::default_commodities())
    }

    /// Create an auction house listing an arbitrary commodity table
    pub fn with_commodities(
        fabric: Arc<Fabric>,
        config: MarketConfig,
        commodities: Vec<(Commodity, Price)>,
    ) -> SystemResult<Arc<Self>> {
        let (worker_id, inbox) = fabric.register_worker();
        let entity_id = fabric.reserve_entity_ids(1)?[0];

        let mut known_commodities = HashMap::new();
        let mut seed_prices = HashMap::new();
        let mut history = MarketHistory::new();
        let mut books = HashMap::new();
        let mut listings = HashMap::new();
        let mut commodity_order: Vec<Commodity> =
            commodities.iter().map(|(c, _)| c.clone()).collect();
        commodity_order.sort_by(|a, b| a.name.cmp(&b.name));

        for (commodity, seed_price) in commodities {
            history.initialise(&commodity.name);
            books.insert(commodity.name.clone(), Mutex::new(OrderBook::new()));
            listings.insert(
                commodity.name.clone(),
                MarketListing {
                    commodity: commodity.clone(),
                    price_info: PriceInfo {
                        curr_price: seed_price,
                        recent_price: seed_price,
                        curr_net_supply: 0.0,
                        recent_net_supply: 0.0,
                        recent_trade_volume: 0.0,
                    },
                },
            );
            seed_prices.insert(commodity.name.clone(), seed_price);
            known_commodities.insert(commodity.name.clone(), commodity);
        }

        fabric.create_entity(
            entity_id,
            EntityComponents {
                metadata: "AuctionHouseEntity".to_string(),
                listings,
                demographics: Some(DemographicInfo::default()),
                ..Default::default()
            },
        )?;
        fabric.assign_partition(worker_id, entity_id)?;

        let settlement = SettlementEngine::new(fabric.clone(), config.sales_tax, config.broker_fee);
        let house = Arc::new(Self {
            production: ProductionEngine::new(fabric.clone()),
            fabric,
            entity_id,
            worker_id,
            unique_name: format!("AH{}", entity_id),
            known_commodities,
            seed_prices,
            commodity_order,
            books: RwLock::new(books),
            state: Mutex::new(HouseState {
                history,
                settlement,
                demographics: Demographics::default(),
                rng: StdRng::from_os_rng(),
                ticks: 0,
            }),
            inbox: tokio::sync::Mutex::new(Some(inbox)),
            destroyed: AtomicBool::new(false),
            config,
        });
        info!("Created auction house {} (entity #{})", house.unique_name, entity_id);
        Ok(house)
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn known_commodities(&self) -> &HashMap<String, Commodity> {
        &self.known_commodities
    }

    /// Cumulative house revenue from taxes and fees
    pub fn spread_profit(&self) -> f64 {
        self.state.lock().expect("house lock poisoned").settlement.spread_profit
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().expect("house lock poisoned").ticks
    }

    pub fn demographics(&self) -> DemographicInfo {
        self.state
            .lock()
            .expect("house lock poisoned")
            .demographics
            .to_info()
    }

    /// Most recent clearing price, 0 if the commodity never traded
    pub fn most_recent_price(&self, commodity: &str) -> Price {
        self.state
            .lock()
            .expect("house lock poisoned")
            .history
            .prices
            .most_recent(commodity)
    }

    /// Most recent volume-weighted bid price of executed trades
    pub fn most_recent_buy_price(&self, commodity: &str) -> Price {
        self.state
            .lock()
            .expect("house lock poisoned")
            .history
            .buy_prices
            .most_recent(commodity)
    }

    /// Number of price samples recorded so far for a commodity
    pub fn price_samples(&self, commodity: &str) -> usize {
        self.state
            .lock()
            .expect("house lock poisoned")
            .history
            .prices
            .len(commodity)
    }

    /// Mean clearing price over the last `window` ticks
    pub fn average_historical_price(&self, commodity: &str, window: usize) -> Price {
        self.state
            .lock()
            .expect("house lock poisoned")
            .history
            .prices
            .average(commodity, window)
    }

    /// Time-windowed mean of net supply, the role-weighting signal
    pub fn t_average_historical_supply(&self, commodity: &str, window_ms: i64) -> f64 {
        self.state
            .lock()
            .expect("house lock poisoned")
            .history
            .net_supply
            .t_average(commodity, window_ms, utils::now_ms())
    }

    /// Start the command and tick loops
    pub async fn start(self: &Arc<Self>) -> SystemResult<()> {
        crate::utils::logging::log_startup("Auction House");
        let inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| SystemError::Internal("auction house already started".to_string()))?;

        let command_house = self.clone();
        tokio::spawn(async move {
            command_house.command_loop(inbox).await;
        });

        let tick_house = self.clone();
        tokio::spawn(async move {
            tick_house.tick_loop().await;
        });
        Ok(())
    }

    /// Stop both loops at the next opportunity
    pub fn stop(&self) {
        crate::utils::logging::log_shutdown("Auction House");
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // ---- command processing -------------------------------------------------

    async fn command_loop(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<CommandEnvelope>) {
        info!("{} command loop running", self.unique_name);
        while !self.is_stopped() {
            let mut processed = 0usize;
            // block for the first command, then drain a bounded burst
            let first = tokio::time::timeout(Duration::from_millis(50), inbox.recv()).await;
            match first {
                Ok(Some(envelope)) => {
                    self.handle_command(envelope).await;
                    processed += 1;
                }
                Ok(None) => break,
                Err(_) => continue,
            }
            while processed < self.config.max_commands_per_flush {
                match inbox.try_recv() {
                    Ok(envelope) => {
                        self.handle_command(envelope).await;
                        processed += 1;
                    }
                    Err(_) => break,
                }
            }
        }
        info!("{} command loop stopped", self.unique_name);
    }

    async fn handle_command(self: &Arc<Self>, envelope: CommandEnvelope) {
        let caller_worker = envelope.caller_worker;
        match envelope.request.clone() {
            CommandRequest::Register(request) => {
                let response = self.register_agent(caller_worker, request).await;
                envelope.respond(response.map(CommandResponse::Registered));
            }
            CommandRequest::MakeBidOffer(request) => {
                envelope.respond(self.submit_bid(request).map(CommandResponse::OfferAck));
            }
            CommandRequest::MakeAskOffer(request) => {
                envelope.respond(self.submit_ask(request).map(CommandResponse::OfferAck));
            }
            CommandRequest::RequestProduction(request) => {
                envelope.respond(
                    self.request_production(request.sender_id)
                        .map(CommandResponse::Production),
                );
            }
            CommandRequest::RequestShutdown(request) => {
                envelope.respond(self.handle_shutdown(request).map(CommandResponse::ShutdownAck));
            }
            other => {
                envelope.respond(Err(SystemError::Internal(format!(
                    "auction house cannot serve {:?}",
                    other
                ))));
            }
        }
    }

    /// Accept a bid into the book after synchronous validation
    pub fn submit_bid(&self, request: OfferRequest) -> SystemResult<OfferAck> {
        validate_offer_request(&request, &self.known_commodities)?;
        debug!(
            "Bid offer from #{}: {} x{} @ ${:.2}",
            request.sender_id, request.commodity, request.quantity, request.unit_price
        );
        let books = self.books.read().expect("book lock poisoned");
        let book = books
            .get(&request.commodity)
            .ok_or_else(|| SystemError::Validation(format!("Unknown commodity: {}", request.commodity)))?;
        book.lock().expect("book lock poisoned").submit_bid(request.into());
        Ok(OfferAck { accepted: true })
    }

    /// Accept an ask into the book after synchronous validation
    pub fn submit_ask(&self, request: OfferRequest) -> SystemResult<OfferAck> {
        validate_offer_request(&request, &self.known_commodities)?;
        debug!(
            "Ask offer from #{}: {} x{} @ ${:.2}",
            request.sender_id, request.commodity, request.quantity, request.unit_price
        );
        let books = self.books.read().expect("book lock poisoned");
        let book = books
            .get(&request.commodity)
            .ok_or_else(|| SystemError::Validation(format!("Unknown commodity: {}", request.commodity)))?;
        book.lock().expect("book lock poisoned").submit_ask(request.into());
        Ok(OfferAck { accepted: true })
    }

    /// Run one production step on behalf of a trader
    pub fn request_production(&self, trader_id: EntityId) -> SystemResult<ProductionResponse> {
        let mut state = self.state.lock().expect("house lock poisoned");
        let rng = &mut state.rng;
        self.production
            .tick_production(trader_id, &self.known_commodities, rng)
    }

    /// Deregister a trader: demographics, entity deletion, acknowledgement
    pub fn handle_shutdown(&self, request: ShutdownRequest) -> SystemResult<ShutdownAck> {
        {
            let mut state = self.state.lock().expect("house lock poisoned");
            state.demographics.record_death(request.role, request.age_ticks);
        }
        info!("Deregistered trader {}", request.entity_id);
        if let Err(error) = self.fabric.delete_entity(request.entity_id) {
            warn!("Could not delete entity {}: {}", request.entity_id, error);
        }
        Ok(ShutdownAck { ack: true })
    }

    /// Market-driven weighted role choice for an unassigned trader
    pub fn choose_new_class_weighted(&self) -> Role {
        let lookback_ms = self.config.role_lookback_ticks as i64 * self.config.tick_time_ms as i64;
        let now = utils::now_ms();
        let mut state = self.state.lock().expect("house lock poisoned");
        let HouseState { history, rng, .. } = &mut *state;
        roles::choose_role_weighted(
            history,
            &self.known_commodities,
            self.config.role_weight_gamma,
            lookback_ms,
            now,
            rng,
        )
    }

    /// The reserve-create-delegate registration handshake. Every stage is
    /// bounded by the configured per-stage timeout.
    pub async fn register_agent(
        &self,
        caller_worker: WorkerId,
        request: RegisterRequest,
    ) -> SystemResult<RegisterResponse> {
        let stage_timeout = Duration::from_millis(self.config.registration_stage_timeout_ms);
        let mut progress = RegisterProgress::None;

        let entity_id = self
            .stage(stage_timeout, progress, || {
                Ok(self.fabric.reserve_entity_ids(1)?[0])
            })?;
        progress = RegisterProgress::ReservedId;

        let (components, assigned_role) = match request.agent_type {
            AgentType::Monitor => (
                EntityComponents {
                    metadata: "MonitorEntity".to_string(),
                    ..Default::default()
                },
                Role::None,
            ),
            AgentType::AiTrader => {
                let role = if request.requested_role == Role::None {
                    self.choose_new_class_weighted()
                } else {
                    request.requested_role
                };
                let blueprint = roles::blueprint_for(role, &self.known_commodities, &self.seed_prices)
                    .ok_or_else(|| {
                        SystemError::Registration("no producer role available".to_string())
                    })?;
                (
                    EntityComponents {
                        metadata: format!("{}{}", role, entity_id),
                        inventory: Some(blueprint.starting_inventory),
                        buildings: Some(blueprint.buildings),
                        ..Default::default()
                    },
                    role,
                )
            }
            AgentType::HumanTrader => {
                return Err(SystemError::Registration(
                    "human traders are not hosted by this worker".to_string(),
                ))
            }
        };

        self.stage(stage_timeout, progress, || {
            self.fabric.create_entity(entity_id, components)
        })?;
        progress = RegisterProgress::CreatedEntity;

        self.stage(stage_timeout, progress, || {
            self.fabric.assign_partition(caller_worker, entity_id)
        })?;
        progress = RegisterProgress::AssignedPartition;
        debug!("Registration handshake complete at {:?}", progress);

        if request.agent_type == AgentType::AiTrader {
            let mut state = self.state.lock().expect("house lock poisoned");
            state.demographics.increment(assigned_role);
        }

        info!(
            "Registered new {} trader with ID #{}",
            assigned_role, entity_id
        );
        Ok(RegisterResponse {
            entity_id,
            assigned_role,
            listed_commodities: self.commodity_order.clone(),
        })
    }

    /// Run one registration stage under its deadline
    fn stage<T>(
        &self,
        timeout: Duration,
        progress: RegisterProgress,
        operation: impl FnOnce() -> SystemResult<T>,
    ) -> SystemResult<T> {
        let started = Instant::now();
        let value = operation()?;
        if started.elapsed() > timeout {
            return Err(SystemError::Timeout(format!(
                "registration stalled after {:?}",
                progress
            )));
        }
        Ok(value)
    }

    // ---- tick path ----------------------------------------------------------

    async fn tick_loop(self: Arc<Self>) {
        let tick = Duration::from_millis(self.config.tick_time_ms);
        let deadline = (self.config.run_duration_ms > 0)
            .then(|| utils::now_ms() + self.config.run_duration_ms as i64);
        info!("{} ticking every {:?}", self.unique_name, tick);

        while !self.is_stopped() {
            let started = Instant::now();
            let reports = self.tick_once();
            self.deliver_reports(reports);

            let elapsed = started.elapsed();
            if elapsed < tick {
                tokio::time::sleep(tick - elapsed).await;
            } else {
                warn!(
                    "{} overran tick {}: took {:?}/{:?}",
                    self.unique_name,
                    self.ticks(),
                    elapsed,
                    tick
                );
            }
            if let Some(deadline_ms) = deadline {
                if utils::now_ms() > deadline_ms {
                    warn!("{} run deadline reached, shutting down", self.unique_name);
                    self.stop();
                }
            }
        }
        info!("{} tick loop stopped", self.unique_name);
    }

    /// Resolve every commodity once and publish market snapshots.
    /// Returns the fill reports to deliver.
    pub fn tick_once(&self) -> Vec<OfferReport> {
        let now = utils::now_ms();
        let mut state = self.state.lock().expect("house lock poisoned");
        let mut all_reports = Vec::new();

        for commodity in &self.commodity_order {
            let books = self.books.read().expect("book lock poisoned");
            let Some(book_lock) = books.get(&commodity.name) else {
                continue;
            };
            let mut book = book_lock.lock().expect("book lock poisoned");
            let HouseState {
                history, settlement, ..
            } = &mut *state;
            let (reports, _stats) =
                resolve_offers(&mut book, commodity, now, &self.fabric, settlement, history);
            all_reports.extend(reports);
        }

        state.ticks += 1;
        debug!(
            "Net spread profit for tick {}: {:.2}",
            state.ticks, state.settlement.spread_profit
        );

        for commodity in &self.commodity_order {
            let listing = self.build_listing(commodity, &state.history, now);
            if let Err(error) = self.fabric.update_listing(self.entity_id, listing) {
                warn!("Could not publish listing for {}: {}", commodity.name, error);
            }
        }

        let demographics = state.demographics.to_info();
        if let Err(error) = self.fabric.update_demographics(self.entity_id, demographics.clone()) {
            warn!("Could not publish demographics: {}", error);
        } else if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Demographics: {}",
                serde_json::to_string(&demographics).unwrap_or_default()
            );
        }

        all_reports
    }

    fn build_listing(&self, commodity: &Commodity, history: &MarketHistory, now: i64) -> MarketListing {
        let tick_ms = self.config.tick_time_ms as i64;
        let recent_ms = self.config.recent_window_ticks as i64 * tick_ms;
        let name = &commodity.name;
        MarketListing {
            commodity: commodity.clone(),
            price_info: PriceInfo {
                curr_price: history.prices.t_average(name, tick_ms, now),
                recent_price: history.prices.t_average(name, recent_ms, now),
                curr_net_supply: history.net_supply.t_average(name, tick_ms, now),
                recent_net_supply: history.net_supply.t_average(name, recent_ms, now),
                recent_trade_volume: history.trades.t_total(name, recent_ms, now),
            },
        }
    }

    /// Fire the per-offer fill reports at their senders without blocking
    /// the tick path on trader responsiveness
    fn deliver_reports(&self, reports: Vec<OfferReport>) {
        if reports.is_empty() {
            return;
        }
        let fabric = self.fabric.clone();
        let worker_id = self.worker_id;
        let timeout = Duration::from_millis(self.config.tick_time_ms.max(50) * 2);
        tokio::spawn(async move {
            for report in reports {
                let target = report.sender_id();
                let request = match report {
                    OfferReport::Bid { report, .. } => CommandRequest::ReportBidOffer(report),
                    OfferReport::Ask { report, .. } => CommandRequest::ReportAskOffer(report),
                };
                if let Err(error) = fabric.send_command(target, worker_id, request, timeout).await {
                    debug!("Report to {} not delivered: {}", target, error);
                }
            }
        });
    }
}
