//! # Order Book & Matcher
//!
//! Per-commodity double-sided book and the once-per-tick resolution
//! pass: expiry/validation, stable price sort, matching at the ask
//! price, settlement dispatch and history appends.

use super::history::MarketHistory;
use super::settlement::{SettlementEngine, SettlementOutcome};
use super::types::*;
use crate::fabric::Fabric;
use crate::types::*;
use crate::utils::{SystemError, SystemResult};
use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The two ordered sequences for one commodity. Storage order is
/// submission order; price ordering is imposed at resolution time.
#[derive(Debug, Default)]
pub struct OrderBook {
    bids: Vec<(BidOffer, BidResult)>,
    asks: Vec<(AskOffer, AskResult)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accepted bid to the book
    pub fn submit_bid(&mut self, offer: BidOffer) {
        let result = BidResult::new(offer.sender_id, &offer.commodity);
        self.bids.push((offer, result));
    }

    /// Append an accepted ask to the book
    pub fn submit_ask(&mut self, offer: AskOffer) {
        let result = AskResult::new(offer.sender_id, &offer.commodity);
        self.asks.push((offer, result));
    }

    pub fn open_bids(&self) -> usize {
        self.bids.len()
    }

    pub fn open_asks(&self) -> usize {
        self.asks.len()
    }
}

/// Synchronous checks applied when an offer command arrives. Anything
/// rejected here never enters the book.
pub fn validate_offer_request(
    request: &OfferRequest,
    known_commodities: &HashMap<String, Commodity>,
) -> SystemResult<()> {
    if request.quantity <= 0 {
        return Err(SystemError::Validation(
            "Quantity offered must be > 0".to_string(),
        ));
    }
    if request.unit_price <= 0.0 {
        return Err(SystemError::Validation("Unit price must be > 0".to_string()));
    }
    if !known_commodities.contains_key(&request.commodity) {
        return Err(SystemError::Validation(format!(
            "Unknown commodity: {}",
            request.commodity
        )));
    }
    Ok(())
}

/// Resolve one commodity's book for this tick. Returns the fill reports
/// to deliver (exactly one per closed offer) and the tick statistics.
pub fn resolve_offers(
    book: &mut OrderBook,
    commodity: &Commodity,
    now_ms: i64,
    fabric: &Fabric,
    settlement: &mut SettlementEngine,
    history: &mut MarketHistory,
) -> (Vec<OfferReport>, TickStats) {
    let mut reports = Vec::new();
    let mut stats = TickStats::default();

    // 1. expiry & validation pass, in insertion order
    let mut surviving_bids = Vec::with_capacity(book.bids.len());
    for (mut bid, mut result) in book.bids.drain(..) {
        if validate_bid(&mut bid, &mut result, now_ms, fabric, settlement) {
            stats.demand += bid.quantity as f64;
            surviving_bids.push((bid, result));
        } else {
            reports.push(close_bid(bid, result));
        }
    }
    book.bids = surviving_bids;

    let mut surviving_asks = Vec::with_capacity(book.asks.len());
    for (mut ask, mut result) in book.asks.drain(..) {
        if validate_ask(&mut ask, &mut result, now_ms, fabric, settlement) {
            stats.supply += ask.quantity as f64;
            surviving_asks.push((ask, result));
        } else {
            reports.push(close_ask(ask, result));
        }
    }
    book.asks = surviving_asks;

    // 2. price priority; the sort is stable, so ties keep submission order
    book.bids.sort_by(|a, b| {
        b.0.unit_price
            .partial_cmp(&a.0.unit_price)
            .unwrap_or(Ordering::Equal)
    });
    book.asks.sort_by(|a, b| {
        a.0.unit_price
            .partial_cmp(&b.0.unit_price)
            .unwrap_or(Ordering::Equal)
    });

    // 3. match while the spread is crossed; the seller makes the price
    while !book.bids.is_empty() && !book.asks.is_empty() {
        let bid_price = book.bids[0].0.unit_price;
        let ask_price = book.asks[0].0.unit_price;
        if ask_price > bid_price {
            break;
        }

        let quantity = book.bids[0].0.quantity.min(book.asks[0].0.quantity);
        // submit-time validation rejects non-positive quantities and
        // filled offers close immediately, so the book never holds zeros
        debug_assert!(quantity > 0);

        let buyer = book.bids[0].0.sender_id;
        let seller = book.asks[0].0.sender_id;
        match settlement.settle(commodity, buyer, seller, quantity, ask_price) {
            SettlementOutcome::SellerFail => {
                let (ask, result) = book.asks.remove(0);
                reports.push(close_ask(ask, result));
                break;
            }
            SettlementOutcome::BuyerFail => {
                let (bid, result) = book.bids.remove(0);
                reports.push(close_bid(bid, result));
                break;
            }
            SettlementOutcome::Settled => {
                book.bids[0].0.quantity -= quantity;
                book.asks[0].0.quantity -= quantity;
                book.bids[0].1.update_with_trade(quantity, ask_price);
                book.asks[0].1.update_with_trade(quantity, ask_price);
                stats.record_trade(quantity, ask_price, bid_price);
            }
        }

        if book.bids[0].0.quantity <= 0 {
            let (bid, result) = book.bids.remove(0);
            reports.push(close_bid(bid, result));
        }
        if book.asks[0].0.quantity <= 0 {
            let (ask, result) = book.asks.remove(0);
            reports.push(close_ask(ask, result));
        }
    }

    // 4. history appends; price series carry the previous value forward
    // on no-trade ticks so moving averages stay contiguous
    let name = &commodity.name;
    history.asks.add(name, stats.supply, now_ms);
    history.bids.add(name, stats.demand, now_ms);
    history.net_supply.add(name, stats.supply - stats.demand, now_ms);
    history.trades.add(name, stats.trades as f64, now_ms);
    if stats.units_traded > 0 {
        history.buy_prices.add(name, stats.avg_buy_price, now_ms);
        history.prices.add(name, stats.avg_price, now_ms);
    } else {
        let previous_buy = history.buy_prices.average(name, 1);
        let previous = history.prices.average(name, 1);
        history.buy_prices.add(name, previous_buy, now_ms);
        history.prices.add(name, previous, now_ms);
    }

    debug!(
        "{}: {} trades resolved, {} bids / {} asks remain open",
        name,
        stats.trades,
        book.bids.len(),
        book.asks.len()
    );
    (reports, stats)
}

fn validate_bid(
    bid: &mut BidOffer,
    result: &mut BidResult,
    now_ms: i64,
    fabric: &Fabric,
    settlement: &mut SettlementEngine,
) -> bool {
    if bid.expiry_ms == 0 {
        // immediate offer: valid for exactly this resolution, fee-exempt
        bid.expiry_ms = 1;
        result.broker_fee_paid = true;
    } else if bid.expiry_ms < now_ms {
        return false;
    }

    if !result.broker_fee_paid && settlement.take_broker_fee(bid.sender_id, bid.quantity, bid.unit_price)
    {
        result.broker_fee_paid = true;
    }
    if !result.broker_fee_paid {
        return false;
    }

    let stake = bid.quantity as f64 * bid.unit_price;
    fabric
        .read_inventory(bid.sender_id)
        .map(|inv| inv.has_cash(stake))
        .unwrap_or(false)
}

fn validate_ask(
    ask: &mut AskOffer,
    result: &mut AskResult,
    now_ms: i64,
    fabric: &Fabric,
    settlement: &mut SettlementEngine,
) -> bool {
    if ask.expiry_ms == 0 {
        ask.expiry_ms = 1;
        result.broker_fee_paid = true;
    } else if ask.expiry_ms < now_ms {
        return false;
    }

    if !result.broker_fee_paid && settlement.take_broker_fee(ask.sender_id, ask.quantity, ask.unit_price)
    {
        result.broker_fee_paid = true;
    }
    if !result.broker_fee_paid {
        return false;
    }

    fabric
        .read_inventory(ask.sender_id)
        .map(|inv| inv.has_item(&ask.commodity, ask.quantity))
        .unwrap_or(false)
}

fn close_bid(bid: BidOffer, mut result: BidResult) -> OfferReport {
    if bid.quantity > 0 {
        result.update_with_no_trade(bid.quantity);
    }
    OfferReport::Bid {
        sender_id: result.sender_id,
        report: result.into_report(),
    }
}

fn close_ask(ask: AskOffer, mut result: AskResult) -> OfferReport {
    if ask.quantity > 0 {
        result.update_with_no_trade(ask.quantity);
    }
    OfferReport::Ask {
        sender_id: result.sender_id,
        report: result.into_report(),
    }
}
