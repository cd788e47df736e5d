//! End-to-end scenarios driving the auction house through its public
//! surface: offer submission, tick resolution, settlement effects,
//! production, registration and market publication.

use bazaar_trading_sim::config::MarketConfig;
use bazaar_trading_sim::fabric::{EntityComponents, Fabric};
use bazaar_trading_sim::market::AuctionHouse;
use bazaar_trading_sim::trader::TraderStatus;
use bazaar_trading_sim::utils::testing::{create_test_inventory, create_test_offer};
use bazaar_trading_sim::utils::{now_ms, SystemError};
use bazaar_trading_sim::*;
use std::sync::Arc;
use std::time::Duration;

fn scenario_config() -> MarketConfig {
    MarketConfig {
        tick_time_ms: 10,
        sales_tax: 0.08,
        broker_fee: 0.0,
        ..MarketConfig::default()
    }
}

fn spawn_stub_trader(fabric: &Fabric, cash: f64, items: &[(&str, f64, i64)]) -> EntityId {
    let id = fabric.reserve_entity_ids(1).unwrap()[0];
    fabric
        .create_entity(
            id,
            EntityComponents {
                metadata: format!("StubTrader{}", id),
                inventory: Some(create_test_inventory(cash, items)),
                ..Default::default()
            },
        )
        .unwrap();
    id
}

#[tokio::test]
async fn test_simple_match_settles_exactly() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();
    let seller = spawn_stub_trader(&fabric, 0.0, &[("wood", 1.0, 5)]);
    let buyer = spawn_stub_trader(&fabric, 100.0, &[]);
    let valid_until = now_ms() + 1_000;

    house
        .submit_ask(create_test_offer(seller, "wood", 3, 10.0, valid_until))
        .unwrap();
    house
        .submit_bid(create_test_offer(buyer, "wood", 3, 12.0, valid_until))
        .unwrap();
    let reports = house.tick_once();

    // clearing at the ask price of 10
    let seller_inv = fabric.read_inventory(seller).unwrap();
    let buyer_inv = fabric.read_inventory(buyer).unwrap();
    assert!((seller_inv.cash - 27.6).abs() < 1e-9);
    assert_eq!(seller_inv.quantity_of("wood"), 2);
    assert!((buyer_inv.cash - 70.0).abs() < 1e-9);
    assert_eq!(buyer_inv.quantity_of("wood"), 3);
    assert!((house.spread_profit() - 2.4).abs() < 1e-9);

    // exactly one report per accepted offer, both fully filled
    assert_eq!(reports.len(), 2);
}

#[tokio::test]
async fn test_partial_fill_then_expiry() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();
    let seller = spawn_stub_trader(&fabric, 0.0, &[("food", 0.5, 10)]);
    let buyer = spawn_stub_trader(&fabric, 100.0, &[]);

    house
        .submit_ask(create_test_offer(seller, "food", 10, 5.0, now_ms() + 15))
        .unwrap();
    // immediate bid: valid for exactly one resolution
    house
        .submit_bid(create_test_offer(buyer, "food", 4, 5.0, 0))
        .unwrap();
    let reports = house.tick_once();

    assert_eq!(fabric.read_inventory(seller).unwrap().quantity_of("food"), 6);
    assert_eq!(fabric.read_inventory(buyer).unwrap().quantity_of("food"), 4);
    // only the filled bid closed; the ask stays open
    assert_eq!(reports.len(), 1);

    // let the ask expire, then resolve again
    tokio::time::sleep(Duration::from_millis(30)).await;
    let reports = house.tick_once();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn test_buyer_without_stake_is_closed_out() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();
    let seller = spawn_stub_trader(&fabric, 0.0, &[("ore", 1.0, 5)]);
    let buyer = spawn_stub_trader(&fabric, 15.0, &[]);
    let valid_until = now_ms() + 1_000;

    house
        .submit_ask(create_test_offer(seller, "ore", 5, 4.0, valid_until))
        .unwrap();
    house
        .submit_bid(create_test_offer(buyer, "ore", 5, 4.0, valid_until))
        .unwrap();
    let reports = house.tick_once();

    // the bid cannot stake 20.0 with 15.0 cash: closed, no trade
    assert_eq!(reports.len(), 1);
    assert!((fabric.read_inventory(buyer).unwrap().cash - 15.0).abs() < 1e-9);
    assert_eq!(fabric.read_inventory(seller).unwrap().quantity_of("ore"), 5);
    // net supply records 5 - 0
    assert!((house.t_average_historical_supply("ore", 1_000) - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_price_publication_after_mixed_trades() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();
    let seller = spawn_stub_trader(&fabric, 0.0, &[("food", 0.5, 10)]);
    let buyer = spawn_stub_trader(&fabric, 500.0, &[]);
    let valid_until = now_ms() + 1_000;

    house
        .submit_ask(create_test_offer(seller, "food", 2, 10.0, valid_until))
        .unwrap();
    house
        .submit_ask(create_test_offer(seller, "food", 1, 12.0, valid_until))
        .unwrap();
    house
        .submit_bid(create_test_offer(buyer, "food", 3, 12.0, valid_until))
        .unwrap();
    house.tick_once();

    // 2 units at 10 and 1 at 12, volume-weighted
    assert!((house.most_recent_price("food") - 32.0 / 3.0).abs() < 1e-9);
    assert!((house.most_recent_buy_price("food") - 12.0).abs() < 1e-9);

    let listing = fabric.read_listing(house.entity_id(), "food").unwrap();
    assert!((listing.price_info.curr_price - 32.0 / 3.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_price_history_stays_contiguous() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric, scenario_config()).unwrap();
    for _ in 0..5 {
        house.tick_once();
    }
    for commodity in house.known_commodities().keys() {
        assert_eq!(house.price_samples(commodity), 5);
    }
}

#[tokio::test]
async fn test_production_respects_recipe_priority() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();

    let trader = fabric.reserve_entity_ids(1).unwrap()[0];
    let buildings = TraderBuildings {
        buildings: vec![
            Building {
                produces: vec![RecipeEntry::new("metal", 1, 1.0)],
                requires: vec![RecipeEntry::new("wood", 1, 1.0)],
                priority: 1,
                name: "wood-smelter".to_string(),
                repeatable: false,
            },
            Building {
                produces: vec![RecipeEntry::new("metal", 1, 1.0)],
                requires: vec![RecipeEntry::new("food", 1, 1.0)],
                priority: 2,
                name: "food-smelter".to_string(),
                repeatable: false,
            },
        ],
        idle_tax: 20.0,
    };
    fabric
        .create_entity(
            trader,
            EntityComponents {
                inventory: Some(create_test_inventory(
                    100.0,
                    &[("wood", 1.0, 1), ("food", 0.5, 1)],
                )),
                buildings: Some(buildings),
                ..Default::default()
            },
        )
        .unwrap();

    // priority 1 consumes the wood first
    let first = house.request_production(trader).unwrap();
    assert_eq!(first.consumed.get("wood"), Some(&1));
    assert!(!first.consumed.contains_key("food"));

    // with the wood gone, priority 2 consumes the food
    let second = house.request_production(trader).unwrap();
    assert_eq!(second.consumed.get("food"), Some(&1));
    assert_eq!(fabric.read_inventory(trader).unwrap().quantity_of("metal"), 2);
}

#[tokio::test]
async fn test_offer_commands_round_trip_through_fabric() {
    let fabric = Arc::new(Fabric::new());
    let house = AuctionHouse::new(fabric.clone(), scenario_config()).unwrap();
    house.start().await.unwrap();

    let seller = spawn_stub_trader(&fabric, 0.0, &[("wood", 1.0, 5)]);
    let (worker_id, _inbox) = fabric.register_worker();

    let accepted = fabric
        .send_command(
            house.entity_id(),
            worker_id,
            CommandRequest::MakeAskOffer(create_test_offer(seller, "wood", 2, 3.0, now_ms() + 100)),
            Duration::from_millis(1_000),
        )
        .await
        .unwrap();
    assert!(matches!(
        accepted,
        CommandResponse::OfferAck(OfferAck { accepted: true })
    ));

    let rejected = fabric
        .send_command(
            house.entity_id(),
            worker_id,
            CommandRequest::MakeAskOffer(create_test_offer(seller, "wood", 0, 3.0, 0)),
            Duration::from_millis(1_000),
        )
        .await;
    assert!(matches!(rejected, Err(SystemError::Validation(_))));

    house.stop();
}

#[tokio::test]
async fn test_trader_registers_and_reaps_via_commands() {
    let fabric = Arc::new(Fabric::new());
    let mut config = scenario_config();
    config.tick_time_ms = 20;
    let house = AuctionHouse::new(fabric.clone(), config.clone()).unwrap();
    house.start().await.unwrap();

    let trader = trader::AiTrader::new(
        fabric.clone(),
        house.entity_id(),
        Role::Composter,
        config.tick_time_ms,
        bazaar_trading_sim::config::TraderConfig::default(),
    );
    let response = trader.register().await.unwrap();
    assert_eq!(response.assigned_role, Role::Composter);
    assert_eq!(trader.status(), TraderStatus::Active);
    assert!(fabric.entity_exists(response.entity_id));
    assert_eq!(
        fabric
            .read_inventory(response.entity_id)
            .unwrap()
            .quantity_of("food"),
        1
    );
    assert_eq!(house.demographics().role_counts.get(&Role::Composter), Some(&1));

    trader.request_shutdown().await;
    assert_eq!(trader.status(), TraderStatus::Destroyed);
    assert!(!fabric.entity_exists(response.entity_id));
    assert_eq!(house.demographics().total_deaths, 1);

    house.stop();
}

#[tokio::test]
async fn test_full_simulation_smoke() {
    let mut config = SystemConfig::default();
    config.market.tick_time_ms = 10;
    config.simulation.initial_traders = 4;
    let system = BazaarTradingSystem::new(config).unwrap();
    system.start().await.unwrap();

    // let registration and a few market ticks happen
    tokio::time::sleep(Duration::from_millis(200)).await;

    let house = system.auction_house();
    assert!(house.ticks() >= 2);

    // traders may already have gone bankrupt and been reaped, so count
    // deaths as registration evidence too
    let demographics = system
        .fabric()
        .read_demographics(house.entity_id())
        .unwrap();
    let population: i64 = demographics.role_counts.values().sum();
    assert!(
        population + demographics.total_deaths > 0,
        "no trader ever registered"
    );

    // every commodity has a published listing
    for commodity in house.known_commodities().keys() {
        assert!(system
            .fabric()
            .read_listing(house.entity_id(), commodity)
            .is_some());
    }

    system.stop().await.unwrap();
    assert!(house.is_stopped());
}
