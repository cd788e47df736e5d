//! # Market History
//!
//! Time- and count-windowed aggregates over prices, trades and
//! supply/demand. Each commodity owns six parallel sample streams,
//! appended exactly once per tick by the resolution path.

use std::collections::{HashMap, VecDeque};

/// Samples kept per commodity per stream. Sized to answer the longest
/// window in use (the 100-tick role weighting lookback) with room to
/// spare.
const STREAM_RETENTION: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    at_ms: i64,
    value: f64,
}

/// One named stream of timestamped samples per commodity
#[derive(Debug, Default)]
pub struct HistoryStream {
    streams: HashMap<String, VecDeque<Sample>>,
}

impl HistoryStream {
    /// Create an empty stream for a commodity
    pub fn initialise(&mut self, commodity: &str) {
        self.streams.entry(commodity.to_string()).or_default();
    }

    pub fn exists(&self, commodity: &str) -> bool {
        self.streams.contains_key(commodity)
    }

    /// Append a sample, evicting the oldest past retention
    pub fn add(&mut self, commodity: &str, value: f64, at_ms: i64) {
        let stream = self.streams.entry(commodity.to_string()).or_default();
        stream.push_back(Sample { at_ms, value });
        while stream.len() > STREAM_RETENTION {
            stream.pop_front();
        }
    }

    /// Most recent sample, or 0 if the stream is empty
    pub fn most_recent(&self, commodity: &str) -> f64 {
        self.streams
            .get(commodity)
            .and_then(|s| s.back())
            .map(|s| s.value)
            .unwrap_or(0.0)
    }

    /// Number of samples currently retained
    pub fn len(&self, commodity: &str) -> usize {
        self.streams.get(commodity).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, commodity: &str) -> bool {
        self.len(commodity) == 0
    }

    /// Mean over the last `n` samples; the last sample when `n == 1`
    pub fn average(&self, commodity: &str, n: usize) -> f64 {
        if n <= 1 {
            return self.most_recent(commodity);
        }
        let Some(stream) = self.streams.get(commodity) else {
            return 0.0;
        };
        if stream.is_empty() {
            return 0.0;
        }
        let take = n.min(stream.len());
        let sum: f64 = stream.iter().rev().take(take).map(|s| s.value).sum();
        sum / take as f64
    }

    /// Mean of all samples with timestamp >= `now_ms - window_ms`. Falls
    /// back to the most recent sample when the window is empty, so
    /// published prices stay contiguous across overrun ticks.
    pub fn t_average(&self, commodity: &str, window_ms: i64, now_ms: i64) -> f64 {
        let Some(stream) = self.streams.get(commodity) else {
            return 0.0;
        };
        let cutoff = now_ms - window_ms;
        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in stream.iter().rev() {
            if sample.at_ms < cutoff {
                break;
            }
            sum += sample.value;
            count += 1;
        }
        if count == 0 {
            return self.most_recent(commodity);
        }
        sum / count as f64
    }

    /// Sum of all samples with timestamp >= `now_ms - window_ms`
    pub fn t_total(&self, commodity: &str, window_ms: i64, now_ms: i64) -> f64 {
        let Some(stream) = self.streams.get(commodity) else {
            return 0.0;
        };
        let cutoff = now_ms - window_ms;
        stream
            .iter()
            .rev()
            .take_while(|s| s.at_ms >= cutoff)
            .map(|s| s.value)
            .sum()
    }
}

/// The full per-commodity market history kept by the auction house
#[derive(Debug, Default)]
pub struct MarketHistory {
    /// Volume-weighted clearing prices
    pub prices: HistoryStream,
    /// Volume-weighted bid prices of executed trades
    pub buy_prices: HistoryStream,
    /// Validated demand per tick
    pub bids: HistoryStream,
    /// Validated supply per tick
    pub asks: HistoryStream,
    /// Trade count per tick
    pub trades: HistoryStream,
    /// supply - demand per tick
    pub net_supply: HistoryStream,
}

impl MarketHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty streams for a new commodity
    pub fn initialise(&mut self, commodity: &str) {
        self.prices.initialise(commodity);
        self.buy_prices.initialise(commodity);
        self.bids.initialise(commodity);
        self.asks.initialise(commodity);
        self.trades.initialise(commodity);
        self.net_supply.initialise(commodity);
    }

    pub fn exists(&self, commodity: &str) -> bool {
        self.prices.exists(commodity)
    }
}
