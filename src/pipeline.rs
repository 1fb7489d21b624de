//! Ingestion pipeline: a bounded FIFO between the network producer and a
//! dedicated consumer thread that owns the book registry.
//!
//! The consumer is the only writer. Reads from other tasks are enqueued as
//! [`Command::Query`] closures, so they run between mutations on the consumer
//! thread and observe every event pushed before them.
//!
//! Async callers use [`Producer::push`] and [`Reader::query`], which wait on a
//! full queue without parking a runtime worker. The `blocking_*` variants are
//! for plain threads and must not be called from async code.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::engine::registry::BookRegistry;
use crate::engine::types::OrderEvent;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Callback run by the consumer for every popped event.
pub trait EventHandler {
    fn handle(&mut self, event: OrderEvent);
}

impl EventHandler for BookRegistry {
    fn handle(&mut self, event: OrderEvent) {
        // Failures are logged by `apply`; the stream carries on.
        let _ = self.apply(&event);
    }
}

impl<F: FnMut(OrderEvent)> EventHandler for F {
    fn handle(&mut self, event: OrderEvent) {
        self(event)
    }
}

/// What `push` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer to free a slot.
    #[default]
    Block,
    /// Discard the incoming event and count it.
    DropNewest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, overflow: OverflowPolicy::default() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline queue full, event dropped")]
    QueueFull,

    #[error("pipeline closed")]
    Closed,

    #[error("pipeline already stopped")]
    AlreadyStopped,

    #[error("consumer thread panicked")]
    ConsumerPanicked,

    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

type Query<H> = Box<dyn FnOnce(&H) + Send>;

pub enum Command<H> {
    Apply(OrderEvent),
    Query(Query<H>),
    Stop,
}

/// Producer half. There is exactly one per pipeline.
pub struct Producer<H> {
    tx: Sender<Command<H>>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

// Result of a non-blocking enqueue attempt.
enum Offer<H> {
    Done(PipelineResult<()>),
    Wait(Command<H>),
}

impl<H> Producer<H> {
    /// Enqueues an event. While there is room this never waits; when the
    /// queue is full the configured [`OverflowPolicy`] decides, and `Block`
    /// awaits a free slot.
    pub async fn push(&self, event: OrderEvent) -> PipelineResult<()> {
        match self.offer(event) {
            Offer::Done(res) => res,
            Offer::Wait(cmd) => self.tx.send(cmd).await.map_err(|_| PipelineError::Closed),
        }
    }

    /// [`Producer::push`] for producers running on a plain thread.
    pub fn blocking_push(&self, event: OrderEvent) -> PipelineResult<()> {
        match self.offer(event) {
            Offer::Done(res) => res,
            Offer::Wait(cmd) => self.tx.blocking_send(cmd).map_err(|_| PipelineError::Closed),
        }
    }

    fn offer(&self, event: OrderEvent) -> Offer<H> {
        match self.tx.try_send(Command::Apply(event)) {
            Ok(()) => Offer::Done(Ok(())),
            Err(TrySendError::Full(cmd)) => match self.policy {
                OverflowPolicy::Block => {
                    metrics::counter!("lobfeed_backpressure_total").increment(1);
                    Offer::Wait(cmd)
                }
                OverflowPolicy::DropNewest => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics::counter!("lobfeed_events_dropped_total").increment(1);
                    warn!(dropped_total = total, "Pipeline full, dropping event");
                    Offer::Done(Err(PipelineError::QueueFull))
                }
            },
            Err(TrySendError::Closed(_)) => Offer::Done(Err(PipelineError::Closed)),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

/// Cloneable read handle for tasks other than the producer.
pub struct Reader<H> {
    tx: Sender<Command<H>>,
}

impl<H> Clone for Reader<H> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<H> Reader<H> {
    /// Runs `f` against the handler on the consumer thread, after every
    /// event already queued, and returns its result.
    pub async fn query<R, F>(&self, f: F) -> PipelineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&H) -> R + Send + 'static,
    {
        let (job, reply) = Self::job(f);
        self.tx.send(Command::Query(job)).await.map_err(|_| PipelineError::Closed)?;
        // The consumer stopped before reaching the query.
        reply.await.map_err(|_| PipelineError::Closed)
    }

    /// [`Reader::query`] for callers on a plain thread.
    pub fn blocking_query<R, F>(&self, f: F) -> PipelineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&H) -> R + Send + 'static,
    {
        let (job, reply) = Self::job(f);
        self.tx.blocking_send(Command::Query(job)).map_err(|_| PipelineError::Closed)?;
        reply.blocking_recv().map_err(|_| PipelineError::Closed)
    }

    fn job<R, F>(f: F) -> (Query<H>, oneshot::Receiver<R>)
    where
        R: Send + 'static,
        F: FnOnce(&H) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Query<H> = Box::new(move |handler: &H| {
            // Receiver may have given up waiting.
            let _ = reply_tx.send(f(handler));
        });
        (job, reply_rx)
    }
}

pub struct Pipeline<H> {
    reader: Reader<H>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<H>>,
}

impl<H: EventHandler + Send + 'static> Pipeline<H> {
    /// Moves `handler` onto a new consumer thread and returns the pipeline
    /// together with its single producer.
    pub fn spawn(handler: H, config: &PipelineConfig) -> PipelineResult<(Self, Producer<H>)> {
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        let flag = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name("book-consumer".into())
            .spawn(move || consume(handler, rx, flag))?;
        info!(capacity, overflow = ?config.overflow, "Pipeline started");

        let pipeline = Self {
            reader: Reader { tx: tx.clone() },
            running,
            dropped: Arc::clone(&dropped),
            worker: Some(worker),
        };
        let producer = Producer { tx, policy: config.overflow, dropped };
        Ok((pipeline, producer))
    }

    pub async fn query<R, F>(&self, f: F) -> PipelineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&H) -> R + Send + 'static,
    {
        self.reader.query(f).await
    }

    pub fn blocking_query<R, F>(&self, f: F) -> PipelineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&H) -> R + Send + 'static,
    {
        self.reader.blocking_query(f)
    }

    pub fn reader(&self) -> Reader<H> {
        self.reader.clone()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stops the consumer after the command it is currently running, joins
    /// it, and hands the handler back. Commands still queued are discarded.
    /// The join waits on an OS thread; async callers run this on the
    /// blocking pool.
    pub fn shutdown(&mut self) -> PipelineResult<H> {
        let worker = self.worker.take().ok_or(PipelineError::AlreadyStopped)?;
        self.running.store(false, Ordering::Release);
        // Wakes a consumer parked on an empty queue. A full queue means it is
        // busy and will see the flag on its next pop.
        let _ = self.reader.tx.try_send(Command::Stop);
        let handler = worker.join().map_err(|_| PipelineError::ConsumerPanicked)?;
        info!("Pipeline stopped");
        Ok(handler)
    }
}

impl<H> Drop for Pipeline<H> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.running.store(false, Ordering::Release);
            let _ = self.reader.tx.try_send(Command::Stop);
            let _ = worker.join();
        }
    }
}

fn consume<H: EventHandler>(mut handler: H, mut rx: Receiver<Command<H>>, running: Arc<AtomicBool>) -> H {
    debug!("Consumer loop running");
    let mut applied: u64 = 0;
    while let Some(cmd) = rx.blocking_recv() {
        if !running.load(Ordering::Acquire) {
            break;
        }
        match cmd {
            Command::Apply(event) => {
                handler.handle(event);
                applied += 1;
                metrics::counter!("lobfeed_events_applied_total").increment(1);
                metrics::gauge!("lobfeed_queue_depth").set(rx.len() as f64);
            }
            Command::Query(job) => job(&handler),
            Command::Stop => break,
        }
    }
    let discarded = rx.len();
    if discarded > 0 {
        warn!(discarded, "Consumer stopped with commands still queued");
    }
    debug!(applied, "Consumer loop exited");
    handler
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EventKind, Side};
    use std::sync::mpsc;
    use std::time::Duration;

    fn add(id: &str, price: f64, qty: f64) -> OrderEvent {
        OrderEvent::new(id, Side::Bid, EventKind::Add, price, qty, "X")
    }

    // Records event ids in the order the consumer saw them.
    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl EventHandler for Recorder {
        fn handle(&mut self, event: OrderEvent) {
            self.0.push(event.id);
        }
    }

    #[test]
    fn test_ordering_and_query_barrier() {
        let (mut pipeline, producer) =
            Pipeline::spawn(Recorder::default(), &PipelineConfig::default()).unwrap();
        for i in 0..500 {
            producer.blocking_push(add(&format!("e{i}"), 1.0, 1.0)).unwrap();
        }
        let seen = pipeline.blocking_query(|r: &Recorder| r.0.clone()).unwrap();
        let expected: Vec<String> = (0..500).map(|i| format!("e{i}")).collect();
        assert_eq!(seen, expected);
        assert_eq!(pipeline.shutdown().unwrap().0, expected);
    }

    #[test]
    fn test_shutdown_joins_once() {
        let (mut pipeline, _producer) =
            Pipeline::spawn(BookRegistry::new(), &PipelineConfig::default()).unwrap();
        assert!(pipeline.is_running());
        assert!(pipeline.shutdown().is_ok());
        assert!(!pipeline.is_running());
        assert!(matches!(pipeline.shutdown(), Err(PipelineError::AlreadyStopped)));
    }

    #[test]
    fn test_push_after_shutdown_is_closed() {
        let (mut pipeline, producer) =
            Pipeline::spawn(BookRegistry::new(), &PipelineConfig::default()).unwrap();
        pipeline.shutdown().unwrap();
        assert!(matches!(producer.blocking_push(add("late", 1.0, 1.0)), Err(PipelineError::Closed)));
    }

    #[test]
    fn test_drop_newest_counts_overflow() {
        // Handler parks until released so the queue fills up.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let handler = move |_ev: OrderEvent| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        };
        let config = PipelineConfig { capacity: 2, overflow: OverflowPolicy::DropNewest };
        let (mut pipeline, producer) = Pipeline::spawn(handler, &config).unwrap();

        let mut rejected = 0;
        for i in 0..10 {
            if let Err(PipelineError::QueueFull) = producer.blocking_push(add(&i.to_string(), 1.0, 1.0)) {
                rejected += 1;
            }
        }
        // At most one event in the handler plus two queued.
        assert!(rejected >= 7, "rejected {rejected}");
        assert_eq!(producer.dropped(), rejected);
        assert_eq!(pipeline.dropped(), rejected);

        for _ in 0..10 {
            let _ = gate_tx.send(());
        }
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn test_registry_behind_pipeline() {
        let (mut pipeline, producer) =
            Pipeline::spawn(BookRegistry::new(), &PipelineConfig::default()).unwrap();
        producer.blocking_push(add("o1", 100.0, 1.0)).unwrap();
        producer.blocking_push(add("o2", 100.0, 2.0)).unwrap();
        producer
            .blocking_push(OrderEvent::new("o1", Side::Bid, EventKind::Remove, 100.0, 1.0, "X"))
            .unwrap();
        let snapshot = pipeline.blocking_query(BookRegistry::serialize).unwrap();
        let book = snapshot.book("X").unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].qty, 2.0);
        pipeline.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_push_waits_without_stalling_runtime() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let handler = move |_ev: OrderEvent| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        };
        let config = PipelineConfig { capacity: 1, overflow: OverflowPolicy::Block };
        let (mut pipeline, producer) = Pipeline::spawn(handler, &config).unwrap();

        // The single-threaded runtime keeps driving timers while pushes wait.
        let mut waited = 0;
        for i in 0..4 {
            let push = producer.push(add(&i.to_string(), 1.0, 1.0));
            if tokio::time::timeout(Duration::from_millis(50), push).await.is_err() {
                waited += 1;
            }
        }
        // At most one event in the handler and one queued.
        assert!(waited >= 2, "waited {waited}");
        assert_eq!(producer.dropped(), 0);

        for _ in 0..10 {
            let _ = gate_tx.send(());
        }
        producer.push(add("after", 1.0, 1.0)).await.unwrap();
        let stopped = tokio::task::spawn_blocking(move || pipeline.shutdown()).await.unwrap();
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_async_query_sees_pushed_events() {
        let (mut pipeline, producer) =
            Pipeline::spawn(Recorder::default(), &PipelineConfig::default()).unwrap();
        producer.push(add("a", 1.0, 1.0)).await.unwrap();
        producer.push(add("b", 1.0, 1.0)).await.unwrap();
        let reader = pipeline.reader();
        assert_eq!(reader.query(|r: &Recorder| r.0.len()).await.unwrap(), 2);

        let stopped = tokio::task::spawn_blocking(move || pipeline.shutdown()).await.unwrap();
        assert_eq!(stopped.unwrap().0, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(reader.query(|r: &Recorder| r.0.len()).await, Err(PipelineError::Closed)));
    }
}
