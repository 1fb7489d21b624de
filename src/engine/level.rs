//! Price levels and the sorted ladder that orders them.
//!
//! Levels live in a [`Slab`] arena owned by the book; ladders and orders refer
//! to them by key, so a level shared by many orders is updated in one place.

use std::collections::HashSet;

use slab::Slab;

use crate::engine::types::{Price, Quantity, Side};

pub type LevelKey = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    price: Price,
    qty: Quantity,
    residents: HashSet<String>,
}

impl Level {
    pub fn new(price: Price) -> Self {
        Self { price, qty: 0.0, residents: HashSet::new() }
    }

    pub fn price(&self) -> Price {
        self.price
    }

    /// Aggregate quantity of all resident orders.
    pub fn qty(&self) -> Quantity {
        self.qty
    }

    /// Ids of the orders currently indexed to this level.
    pub fn residents(&self) -> impl Iterator<Item = &str> {
        self.residents.iter().map(String::as_str)
    }

    pub fn num_orders(&self) -> usize {
        self.residents.len()
    }

    pub(crate) fn join(&mut self, order_id: &str, qty: Quantity) {
        self.qty += qty;
        self.residents.insert(order_id.to_string());
    }

    pub(crate) fn decrement(&mut self, qty: Quantity) -> Quantity {
        self.qty -= qty;
        self.qty
    }

    pub(crate) fn leave(&mut self, order_id: &str) {
        self.residents.remove(order_id);
    }

    pub(crate) fn into_residents(self) -> HashSet<String> {
        self.residents
    }
}

/// Where a price belongs in a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Existing(LevelKey),
    Vacant(usize),
}

/// One side of a book: level keys sorted best-first.
#[derive(Debug, Clone)]
pub struct Ladder {
    side: Side,
    keys: Vec<LevelKey>,
}

impl Ladder {
    pub fn new(side: Side) -> Self {
        Self { side, keys: Vec::new() }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[LevelKey] {
        &self.keys
    }

    /// Binary search for `price`. Prices compare exactly.
    pub fn locate(&self, levels: &Slab<Level>, price: Price) -> Slot {
        let pos = self
            .keys
            .partition_point(|k| self.side.is_better(levels[*k].price, price));
        match self.keys.get(pos) {
            Some(&key) if levels[key].price == price => Slot::Existing(key),
            _ => Slot::Vacant(pos),
        }
    }

    pub fn contains(&self, key: LevelKey) -> bool {
        self.keys.contains(&key)
    }

    pub(crate) fn insert_at(&mut self, pos: usize, key: LevelKey) {
        self.keys.insert(pos, key);
    }

    /// Cuts the ladder down to `depth`, returning the keys that fell off.
    pub(crate) fn truncate(&mut self, depth: usize) -> Vec<LevelKey> {
        if self.keys.len() > depth {
            self.keys.split_off(depth)
        } else {
            Vec::new()
        }
    }

    /// Removes the entry holding exactly `key` (identity, not price).
    pub(crate) fn remove(&mut self, key: LevelKey) -> bool {
        match self.keys.iter().position(|k| *k == key) {
            Some(pos) => {
                self.keys.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn levels<'a>(&'a self, levels: &'a Slab<Level>) -> impl Iterator<Item = &'a Level> + 'a {
        self.keys.iter().map(move |k| &levels[*k])
    }

    pub fn best<'a>(&self, levels: &'a Slab<Level>) -> Option<&'a Level> {
        self.keys.first().map(|k| &levels[*k])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder_with(side: Side, prices: &[Price]) -> (Ladder, Slab<Level>) {
        let mut levels = Slab::new();
        let mut ladder = Ladder::new(side);
        for &p in prices {
            if let Slot::Vacant(pos) = ladder.locate(&levels, p) {
                let key = levels.insert(Level::new(p));
                ladder.insert_at(pos, key);
            }
        }
        (ladder, levels)
    }

    fn prices(ladder: &Ladder, levels: &Slab<Level>) -> Vec<Price> {
        ladder.levels(levels).map(Level::price).collect()
    }

    #[test]
    fn test_bids_sort_descending() {
        let (ladder, levels) = ladder_with(Side::Bid, &[100.0, 102.0, 101.0, 99.5]);
        assert_eq!(prices(&ladder, &levels), vec![102.0, 101.0, 100.0, 99.5]);
    }

    #[test]
    fn test_asks_sort_ascending() {
        let (ladder, levels) = ladder_with(Side::Ask, &[100.0, 102.0, 101.0, 99.5]);
        assert_eq!(prices(&ladder, &levels), vec![99.5, 100.0, 101.0, 102.0]);
    }

    #[test]
    fn test_locate_finds_existing_price() {
        let (ladder, levels) = ladder_with(Side::Ask, &[10.0, 11.0]);
        let key = ladder.keys()[1];
        assert_eq!(ladder.locate(&levels, 11.0), Slot::Existing(key));
        assert_eq!(ladder.locate(&levels, 10.5), Slot::Vacant(1));
    }

    #[test]
    fn test_remove_is_by_identity() {
        let (mut ladder, mut levels) = ladder_with(Side::Bid, &[5.0, 4.0]);
        // Same price as an existing entry, but a different level.
        let stray = levels.insert(Level::new(5.0));
        assert!(!ladder.remove(stray));
        assert_eq!(ladder.len(), 2);

        let first = ladder.keys()[0];
        assert!(ladder.remove(first));
        assert_eq!(prices(&ladder, &levels), vec![4.0]);
    }

    #[test]
    fn test_truncate_returns_farthest() {
        let (mut ladder, levels) = ladder_with(Side::Ask, &[1.0, 2.0, 3.0]);
        let dropped = ladder.truncate(2);
        assert_eq!(dropped.len(), 1);
        assert_eq!(levels[dropped[0]].price(), 3.0);
        assert!(ladder.truncate(2).is_empty());
    }

    #[test]
    fn test_level_aggregate() {
        let mut level = Level::new(100.0);
        level.join("a", 1.0);
        level.join("b", 2.5);
        assert_eq!(level.qty(), 3.5);
        assert_eq!(level.num_orders(), 2);
        level.leave("a");
        assert_eq!(level.decrement(1.0), 2.5);
        assert_eq!(level.residents().collect::<Vec<_>>(), vec!["b"]);
    }
}
