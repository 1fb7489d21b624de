use std::collections::HashMap;

use slab::Slab;
use tracing::{debug, info, instrument, trace, warn};

use crate::engine::level::{Ladder, Level, LevelKey, Slot};
use crate::engine::registry::{BookView, LevelView};
use crate::engine::types::{
    BookError, BookResult, ModifyOutcome, OrderEvent, Price, Quantity, Side, DEFAULT_DEPTH,
    EPSILON,
};

// Indexed order: its own residual size plus the level it rests on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub qty: Quantity,
    pub side: Side,
    pub level: LevelKey,
}

/// One symbol's bid/ask ladders and the order index that points into them.
#[derive(Debug, Clone)]
pub struct Book {
    symbol: String,
    depth: usize,
    levels: Slab<Level>,
    bids: Ladder,
    asks: Ladder,
    orders: HashMap<String, Order>,
}

impl Book {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_depth(symbol, DEFAULT_DEPTH)
    }

    pub fn with_depth(symbol: impl Into<String>, depth: usize) -> Self {
        let symbol = symbol.into();
        info!(symbol = %symbol, depth, "Initialized new order book");
        Self {
            symbol,
            depth,
            levels: Slab::new(),
            bids: Ladder::new(Side::Bid),
            asks: Ladder::new(Side::Ask),
            orders: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bid levels, best (highest) first.
    pub fn bids(&self) -> impl Iterator<Item = &Level> {
        self.bids.levels(&self.levels)
    }

    /// Ask levels, best (lowest) first.
    pub fn asks(&self) -> impl Iterator<Item = &Level> {
        self.asks.levels(&self.levels)
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = &Level> {
        match side {
            Side::Bid => self.bids.levels(&self.levels),
            Side::Ask => self.asks.levels(&self.levels),
        }
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best(&self.levels).map(|l| (l.price(), l.qty()))
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best(&self.levels).map(|l| (l.price(), l.qty()))
    }

    pub fn spread(&self) -> Option<Price> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask - bid)
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// The level an indexed order currently rests on.
    pub fn level_of(&self, order_id: &str) -> Option<&Level> {
        self.orders.get(order_id).and_then(|o| self.levels.get(o.level))
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn view(&self) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            bids: self.bids().map(LevelView::from).collect(),
            asks: self.asks().map(LevelView::from).collect(),
        }
    }

    /// Adds an order to its price level, creating the level if needed, then
    /// trims the side back to the depth bound.
    ///
    /// Returns the ids of orders evicted by the trim. Input is not validated.
    #[instrument(level = "trace", skip_all, fields(symbol = %self.symbol, order_id = %ev.id))]
    pub fn add(&mut self, ev: &OrderEvent) -> Vec<String> {
        if let Some(prev) = self.orders.remove(&ev.id) {
            warn!(symbol = %self.symbol, order_id = %ev.id, "Duplicate add, replacing resting order");
            self.retire(&ev.id, prev);
        }

        let (ladder, levels) = match ev.side {
            Side::Bid => (&mut self.bids, &mut self.levels),
            Side::Ask => (&mut self.asks, &mut self.levels),
        };

        let key = match ladder.locate(levels, ev.price) {
            Slot::Existing(key) => key,
            Slot::Vacant(pos) => {
                let key = levels.insert(Level::new(ev.price));
                ladder.insert_at(pos, key);
                trace!(price = ev.price, side = ?ev.side, "Created level");
                key
            }
        };
        levels[key].join(&ev.id, ev.qty);
        self.orders
            .insert(ev.id.clone(), Order { qty: ev.qty, side: ev.side, level: key });

        let dropped = ladder.truncate(self.depth);
        let evicted: Vec<String> = dropped.into_iter().flat_map(|k| self.drop_level(k)).collect();
        if !evicted.is_empty() {
            debug!(symbol = %self.symbol, count = evicted.len(), "Depth bound evicted orders");
        }
        evicted
    }

    /// Subtracts the event quantity from the order and its level; with
    /// `remove` the order also leaves the index. A level at or below
    /// [`EPSILON`] leaves the ladder. Orders still resting on it stay indexed
    /// against the detached level, which is freed once its last order leaves.
    #[instrument(level = "trace", skip_all, fields(symbol = %self.symbol, order_id = %ev.id))]
    pub fn modify(&mut self, ev: &OrderEvent, remove: bool) -> BookResult<ModifyOutcome> {
        let Some(order) = self.orders.get_mut(&ev.id) else {
            return Err(BookError::OrderNotFound {
                symbol: self.symbol.clone(),
                order_id: ev.id.clone(),
            });
        };
        order.qty -= ev.qty;
        let (key, side) = (order.level, order.side);

        let level_qty = self.levels[key].decrement(ev.qty);
        if remove {
            self.orders.remove(&ev.id);
            self.levels[key].leave(&ev.id);
        }

        let level_removed = level_qty <= EPSILON && self.ladder_mut(side).remove(key);
        self.release_if_detached(key, side);
        debug!(
            symbol = %self.symbol,
            order_id = %ev.id,
            level_qty,
            removed = remove,
            level_removed,
            "Modified order"
        );
        Ok(ModifyOutcome { level_qty, level_removed })
    }

    /// True when the order's level is no longer in its ladder.
    pub fn is_detached(&self, order_id: &str) -> bool {
        self.orders
            .get(order_id)
            .is_some_and(|o| !self.ladder(o.side).contains(o.level))
    }

    fn ladder(&self, side: Side) -> &Ladder {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut Ladder {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    // Takes a replaced order's size back out of its level.
    fn retire(&mut self, order_id: &str, prev: Order) {
        let level = &mut self.levels[prev.level];
        level.leave(order_id);
        if level.decrement(prev.qty) <= EPSILON {
            self.ladder_mut(prev.side).remove(prev.level);
        }
        self.release_if_detached(prev.level, prev.side);
    }

    // A level out of its ladder lives only as long as some order rests on it.
    fn release_if_detached(&mut self, key: LevelKey, side: Side) {
        if self.levels[key].num_orders() == 0 && !self.ladder(side).contains(key) {
            self.levels.remove(key);
        }
    }

    // Frees a level cut by the depth bound and unindexes its orders.
    fn drop_level(&mut self, key: LevelKey) -> Vec<String> {
        let residents = self.levels.remove(key).into_residents();
        residents
            .into_iter()
            .filter(|id| self.orders.remove(id).is_some())
            .collect()
    }
}
