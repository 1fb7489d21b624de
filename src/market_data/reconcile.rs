//! Startup reconciliation between snapshots and live updates.
//!
//! After subscribing, snapshot and update frames interleave. Updates seen
//! before the last snapshot are held in a backlog and applied only once every
//! subscribed symbol's snapshot has landed, in arrival order. From then on
//! every message is forwarded as plain events.

use tracing::{debug, info, instrument, warn};

use crate::engine::types::OrderEvent;
use crate::market_data::adapters::{FeedMessage, FrameDecoder, FrameSource};
use crate::market_data::error::{FeedError, FeedResult};
use crate::pipeline::EventHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    AwaitingSnapshot { remaining: usize },
    Reconciled,
    Streaming,
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Snapshot applied to the sink.
    Applied { events: usize },
    /// Update held back until the snapshots are in.
    Buffered { events: usize },
    /// Streaming: the caller routes these onward.
    Forward(Vec<OrderEvent>),
    Ignored,
}

#[derive(Debug)]
pub struct Reconciler {
    state: ReconcileState,
    backlog: Vec<OrderEvent>,
    backlog_applied: usize,
}

impl Reconciler {
    /// `symbols` is the number of snapshots to wait for.
    pub fn new(symbols: usize) -> Self {
        let state = if symbols == 0 {
            ReconcileState::Reconciled
        } else {
            ReconcileState::AwaitingSnapshot { remaining: symbols }
        };
        Self { state, backlog: Vec::new(), backlog_applied: 0 }
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ReconcileState::Streaming
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// How many buffered events were replayed when the snapshots completed.
    pub fn backlog_applied(&self) -> usize {
        self.backlog_applied
    }

    pub fn on_message<H: EventHandler>(&mut self, msg: FeedMessage, sink: &mut H) -> Step {
        if self.state == ReconcileState::Reconciled {
            self.drain(sink);
        }
        match self.state {
            ReconcileState::AwaitingSnapshot { remaining } => match msg {
                FeedMessage::Snapshot(events) => {
                    let count = events.len();
                    for ev in events {
                        sink.handle(ev);
                    }
                    let remaining = remaining.saturating_sub(1);
                    info!(events = count, remaining, "Applied snapshot");
                    self.state = ReconcileState::AwaitingSnapshot { remaining };
                    if remaining == 0 {
                        self.state = ReconcileState::Reconciled;
                        self.drain(sink);
                    }
                    Step::Applied { events: count }
                }
                FeedMessage::Update(events) => {
                    let count = events.len();
                    self.backlog.extend(events);
                    debug!(events = count, backlog = self.backlog.len(), "Buffered update");
                    Step::Buffered { events: count }
                }
                FeedMessage::Other => Step::Ignored,
            },
            ReconcileState::Streaming => match msg {
                FeedMessage::Other => Step::Ignored,
                msg => Step::Forward(msg.into_events()),
            },
            // drain() above always moves on to Streaming
            ReconcileState::Reconciled => Step::Ignored,
        }
    }

    fn drain<H: EventHandler>(&mut self, sink: &mut H) {
        info!(backlog = self.backlog.len(), "Processing backlog");
        metrics::counter!("lobfeed_backlog_events_total").increment(self.backlog.len() as u64);
        self.backlog_applied += self.backlog.len();
        for ev in self.backlog.drain(..) {
            sink.handle(ev);
        }
        self.state = ReconcileState::Streaming;
    }
}

/// Reads frames until every snapshot has been applied to `sink` and the
/// backlog replayed. Undecodable frames are logged and skipped.
#[instrument(skip_all, fields(symbols = symbols))]
pub async fn reconcile<S, D, H>(
    source: &mut S,
    decoder: &mut D,
    symbols: usize,
    sink: &mut H,
) -> FeedResult<Reconciler>
where
    S: FrameSource + ?Sized,
    D: FrameDecoder + ?Sized,
    H: EventHandler,
{
    let mut reconciler = Reconciler::new(symbols);
    if reconciler.state() == ReconcileState::Reconciled {
        reconciler.drain(sink);
    }
    while !reconciler.is_streaming() {
        let Some(frame) = source.next_frame().await? else {
            warn!(state = ?reconciler.state(), "Feed closed before snapshots completed");
            return Err(FeedError::Closed);
        };
        match decoder.classify(&frame) {
            Ok(msg) => {
                reconciler.on_message(msg, sink);
            }
            Err(e) => warn!(error = %e, "Skipping undecodable frame"),
        }
    }
    info!(backlog_applied = reconciler.backlog_applied(), "Book reconciled, streaming");
    Ok(reconciler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::BookRegistry;
    use crate::engine::types::{EventKind, Side};
    use crate::market_data::adapters::ReplaySource;

    fn ev(id: &str, kind: EventKind, price: f64, qty: f64) -> OrderEvent {
        OrderEvent::new(id, Side::Bid, kind, price, qty, "X")
    }

    #[test]
    fn test_update_before_snapshot_is_buffered() {
        let mut registry = BookRegistry::new();
        let mut rec = Reconciler::new(1);

        let a = FeedMessage::Update(vec![ev("s1", EventKind::Update, 100.0, 1.0)]);
        assert_eq!(rec.on_message(a, &mut registry), Step::Buffered { events: 1 });
        assert!(registry.is_empty());
        assert_eq!(rec.backlog_len(), 1);

        let s = FeedMessage::Snapshot(vec![ev("s1", EventKind::Add, 100.0, 3.0)]);
        assert_eq!(rec.on_message(s, &mut registry), Step::Applied { events: 1 });
        assert!(rec.is_streaming());
        assert_eq!(rec.backlog_len(), 0);
        assert_eq!(rec.backlog_applied(), 1);
        // Snapshot first, then the buffered decrement.
        assert_eq!(registry.book("X").and_then(|b| b.best_bid()), Some((100.0, 2.0)));

        let b = FeedMessage::Update(vec![ev("s1", EventKind::Remove, 100.0, 2.0)]);
        let Step::Forward(events) = rec.on_message(b, &mut registry) else {
            panic!("expected forward");
        };
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_waits_for_every_symbol() {
        let mut seen = Vec::new();
        let mut sink = |e: OrderEvent| seen.push(e.id);
        let mut rec = Reconciler::new(2);

        rec.on_message(FeedMessage::Snapshot(vec![ev("x1", EventKind::Add, 1.0, 1.0)]), &mut sink);
        assert_eq!(rec.state(), ReconcileState::AwaitingSnapshot { remaining: 1 });
        rec.on_message(FeedMessage::Update(vec![ev("u1", EventKind::Update, 1.0, 0.5)]), &mut sink);
        assert_eq!(rec.on_message(FeedMessage::Other, &mut sink), Step::Ignored);
        rec.on_message(FeedMessage::Snapshot(vec![ev("y1", EventKind::Add, 2.0, 1.0)]), &mut sink);
        assert!(rec.is_streaming());
        drop(sink);
        assert_eq!(seen, vec!["x1", "y1", "u1"]);
    }

    #[tokio::test]
    async fn test_reconcile_over_frames() {
        let frames = vec![
            r#"{"method":"subscribe","success":true}"#,
            r#"{"channel":"level3","type":"update","data":[{"symbol":"X","bids":[{"event":"modify","order_id":"A","limit_price":10.0,"order_qty":1.0}],"asks":[]}]}"#,
            "garbage",
            r#"{"channel":"level3","type":"snapshot","data":[{"symbol":"X","bids":[{"order_id":"A","limit_price":10.0,"order_qty":4.0}],"asks":[]}]}"#,
            r#"{"channel":"level3","type":"update","data":[{"symbol":"X","bids":[{"event":"delete","order_id":"A","limit_price":10.0,"order_qty":3.0}],"asks":[]}]}"#,
        ];
        let mut source = ReplaySource::new(frames);
        let mut decoder = crate::market_data::adapters::kraken::KrakenDecoder::new("level3");
        let mut registry = BookRegistry::new();

        let rec = reconcile(&mut source, &mut decoder, 1, &mut registry).await.unwrap();
        assert!(rec.is_streaming());
        assert_eq!(rec.backlog_applied(), 1);
        assert_eq!(registry.book("X").and_then(|b| b.best_bid()), Some((10.0, 3.0)));
        // The post-snapshot update is left for the streaming stage.
        assert_eq!(source.remaining(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_fails_on_early_close() {
        let mut source = ReplaySource::new(Vec::<String>::new());
        let mut decoder = crate::market_data::adapters::kraken::KrakenDecoder::new("level3");
        let mut registry = BookRegistry::new();
        let res = reconcile(&mut source, &mut decoder, 1, &mut registry).await;
        assert!(matches!(res, Err(FeedError::Closed)));
    }
}
