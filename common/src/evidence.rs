use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single price level of an order book side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// Order book snapshot supplied alongside a candidate signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }
}

/// Volume behaviour around the signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetrics {
    /// Relative change of volume, e.g. 0.12 = +12%
    pub acceleration: f64,
    /// Volume pushed price through a level without follow-through
    pub skid: bool,
}

/// Read-only evidence used to score one signal. Owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub order_book: Option<OrderBookSnapshot>,
    pub volume: VolumeMetrics,
}

impl EvidenceBundle {
    pub fn new(order_book: Option<OrderBookSnapshot>, volume: VolumeMetrics) -> Self {
        Self { order_book, volume }
    }
}
