// Convert decoded wire orders into internal OrderEvents.
// Malformed numbers are rejected here so the book never sees them.

use tracing::warn;

use crate::engine::types::{EventKind, OrderEvent, Side};
use crate::market_data::adapters::kraken_types::{Level3Data, WsOrder};
use crate::market_data::error::{FeedError, FeedResult};

#[derive(Debug, Default)]
pub struct Normaliser {
    rejected: u64,
}

impl Normaliser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn kind_for(event: Option<&str>) -> EventKind {
        match event {
            Some("add") => EventKind::Add,
            Some("delete") => EventKind::Remove,
            _ => EventKind::Update,
        }
    }

    pub fn order_event(symbol: &str, side: Side, order: &WsOrder, snapshot: bool) -> FeedResult<OrderEvent> {
        check(&order.order_id, "price", order.limit_price)?;
        check(&order.order_id, "quantity", order.order_qty)?;
        let kind = if snapshot {
            EventKind::Add
        } else {
            Self::kind_for(order.event.as_deref())
        };
        Ok(OrderEvent::new(
            order.order_id.clone(),
            side,
            kind,
            order.limit_price,
            order.order_qty,
            symbol,
        ))
    }

    /// Every valid order of every entry, bids before asks per entry.
    pub fn events(&mut self, data: &[Level3Data], snapshot: bool) -> Vec<OrderEvent> {
        let mut out = Vec::new();
        for entry in data {
            let sides = [(Side::Bid, &entry.bids), (Side::Ask, &entry.asks)];
            for (side, orders) in sides {
                for order in orders {
                    match Self::order_event(&entry.symbol, side, order, snapshot) {
                        Ok(ev) => out.push(ev),
                        Err(e) => {
                            self.rejected += 1;
                            metrics::counter!("lobfeed_orders_rejected_total").increment(1);
                            warn!(symbol = %entry.symbol, error = %e, "Rejecting order");
                        }
                    }
                }
            }
        }
        out
    }
}

fn check(order_id: &str, field: &str, value: f64) -> FeedResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(FeedError::MalformedInput {
            order_id: order_id.to_string(),
            reason: format!("{field} {value} is negative or not finite"),
        });
    }
    Ok(())
}
