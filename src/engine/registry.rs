//! Multi-symbol book store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::book::Book;
use crate::engine::level::Level;
use crate::engine::types::{
    BookError, BookResult, EventKind, ModifyOutcome, OrderEvent, Price, Quantity, DEFAULT_DEPTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: Price,
    pub qty: Quantity,
}

impl From<&Level> for LevelView {
    fn from(level: &Level) -> Self {
        Self { price: level.price(), qty: level.qty() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub symbol: String,
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
}

/// Serialized form of every book, ready for an external encoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub books: Vec<BookView>,
}

impl BookSnapshot {
    pub fn book(&self, symbol: &str) -> Option<&BookView> {
        self.books.iter().find(|b| b.symbol == symbol)
    }
}

/// Routes events to per-symbol books, creating a book on its first add.
#[derive(Debug, Clone)]
pub struct BookRegistry {
    books: HashMap<String, Book>,
    depth: usize,
}

impl Default for BookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::with_depth(DEFAULT_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        Self { books: HashMap::new(), depth }
    }

    pub fn book(&self, symbol: &str) -> Option<&Book> {
        self.books.get(symbol)
    }

    pub fn books(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn add(&mut self, ev: &OrderEvent) -> Vec<String> {
        let depth = self.depth;
        self.books
            .entry(ev.symbol.clone())
            .or_insert_with(|| {
                info!(symbol = %ev.symbol, "Creating book");
                Book::with_depth(ev.symbol.clone(), depth)
            })
            .add(ev)
    }

    pub fn modify(&mut self, ev: &OrderEvent, remove: bool) -> BookResult<ModifyOutcome> {
        match self.books.get_mut(&ev.symbol) {
            Some(book) => book.modify(ev, remove),
            None => Err(BookError::BookNotFound { symbol: ev.symbol.clone() }),
        }
    }

    /// Applies one event by its type tag. Unknown references are logged and
    /// skipped; the error is handed back for callers that count them.
    pub fn apply(&mut self, ev: &OrderEvent) -> BookResult<()> {
        let result = match ev.kind {
            EventKind::Add => {
                self.add(ev);
                Ok(())
            }
            EventKind::Update => self.modify(ev, false).map(|_| ()),
            EventKind::Remove => self.modify(ev, true).map(|_| ()),
        };
        if let Err(e) = &result {
            warn!(error = %e, kind = ?ev.kind, "Skipping event");
            metrics::counter!("lobfeed_orders_not_found_total").increment(1);
        }
        result
    }

    pub fn serialize(&self) -> BookSnapshot {
        BookSnapshot { books: self.books.values().map(Book::view).collect() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.serialize())
    }
}
