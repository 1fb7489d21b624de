// Market data module entrypoint
pub mod adapters;    // venue-specific transports (e.g. Kraken level3)
pub mod error;       // feed-side error taxonomy
pub mod normaliser;  // converts wire orders -> validated OrderEvents
pub mod reconcile;   // snapshot-then-backlog startup protocol
pub mod router;      // orchestrates everything for the binary

pub use error::{FeedError, FeedResult};
