use serde::{Deserialize, Serialize};

pub type Price = f64;
pub type Quantity = f64;

/// Levels whose aggregate falls to or below this are removed from the ladder.
pub const EPSILON: Quantity = 1e-9;

/// Maximum number of levels kept per side.
pub const DEFAULT_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// True when `a` sits nearer the market than `b` on this side.
    pub fn is_better(self, a: Price, b: Price) -> bool {
        match self {
            Side::Bid => a > b,
            Side::Ask => a < b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Remove,
}

// Order event as decoded from the venue feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub price: Price,
    pub qty: Quantity,
    pub symbol: String,
}

impl OrderEvent {
    pub fn new(
        id: impl Into<String>,
        side: Side,
        kind: EventKind,
        price: Price,
        qty: Quantity,
        symbol: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), side, kind, price, qty, symbol: symbol.into() }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookError {
    #[error("order {order_id} not found in book {symbol}")]
    OrderNotFound { symbol: String, order_id: String },

    #[error("book not found: {symbol}")]
    BookNotFound { symbol: String },
}

pub type BookResult<T> = Result<T, BookError>;

/// What a `modify` did to the book.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyOutcome {
    pub level_qty: Quantity,
    /// The level left its ladder on this call.
    pub level_removed: bool,
}
