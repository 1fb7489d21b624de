// Router orchestrates source + reconciliation + pipeline + display
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth;
use crate::config::{AppConfig, DisplayConfig};
use crate::engine::registry::{BookRegistry, BookSnapshot, BookView, LevelView};
use crate::market_data::adapters::kraken::KrakenAdapter;
use crate::market_data::adapters::{FrameDecoder, FrameSource, ReplaySource};
use crate::market_data::error::FeedError;
use crate::market_data::reconcile::reconcile;
use crate::pipeline::{Pipeline, PipelineError, Producer, Reader};

#[derive(Debug)]
enum StreamEnd {
    Shutdown,
    Closed,
    Failed(FeedError),
}

/// Runs the feed until `shutdown` resolves or the source ends, then stops
/// the consumer and returns the final registry.
///
/// With `replay` set, frames come from that file instead of the network.
pub async fn run<F>(config: &AppConfig, replay: Option<&Path>, shutdown: F) -> anyhow::Result<BookRegistry>
where
    F: Future<Output = ()>,
{
    let source: Box<dyn FrameSource> = match replay {
        Some(path) => {
            info!(path = %path.display(), "Replaying recorded frames");
            Box::new(ReplaySource::from_file(path).await?)
        }
        None => {
            let adapter = KrakenAdapter::new(&config.feed);
            let token = auth::provider_from(&config.feed).token().await?;
            Box::new(adapter.connect(token.as_deref()).await?)
        }
    };
    run_with_source(config, source, shutdown).await
}

/// [`run`] over an already opened source.
pub async fn run_with_source<F>(
    config: &AppConfig,
    mut source: Box<dyn FrameSource>,
    shutdown: F,
) -> anyhow::Result<BookRegistry>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut decoder = KrakenAdapter::new(&config.feed).decoder();

    // Startup: snapshots and backlog go straight into the registry.
    let mut registry = BookRegistry::with_depth(config.book.depth);
    let symbols = config.feed.symbols.len();
    let reconciled = tokio::select! {
        res = reconcile(&mut *source, &mut decoder, symbols, &mut registry) => Some(res),
        _ = &mut shutdown => None,
    };
    match reconciled {
        Some(Ok(_)) => {}
        Some(Err(e)) => {
            close_source(&mut *source).await;
            return Err(e.into());
        }
        None => {
            info!("Shutdown requested before the book was reconciled");
            close_source(&mut *source).await;
            return Ok(registry);
        }
    }

    let (mut pipeline, producer) = Pipeline::spawn(registry, &config.pipeline)?;
    let display = spawn_display(pipeline.reader(), config.display.clone());

    let end = stream(&mut *source, &mut decoder, &producer, &mut shutdown).await;
    info!(?end, dropped = producer.dropped(), "Feed stream ended");

    display.abort();
    close_source(&mut *source).await;
    if !matches!(end, StreamEnd::Shutdown) {
        // Let the consumer finish what is already queued.
        let _ = pipeline.query(|_| ()).await;
    }
    let registry = tokio::task::spawn_blocking(move || pipeline.shutdown()).await??;

    match end {
        StreamEnd::Failed(e) => Err(e.into()),
        StreamEnd::Shutdown | StreamEnd::Closed => Ok(registry),
    }
}

async fn stream<F>(
    source: &mut dyn FrameSource,
    decoder: &mut dyn FrameDecoder,
    producer: &Producer<BookRegistry>,
    shutdown: &mut Pin<&mut F>,
) -> StreamEnd
where
    F: Future<Output = ()>,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.as_mut() => return StreamEnd::Shutdown,
            frame = source.next_frame() => frame,
        };
        let text = match frame {
            Ok(Some(text)) => text,
            Ok(None) => return StreamEnd::Closed,
            Err(e) => {
                error!(error = %e, "Feed transport failed");
                return StreamEnd::Failed(e);
            }
        };
        let msg = match decoder.classify(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable frame");
                continue;
            }
        };
        for event in msg.into_events() {
            match producer.push(event).await {
                Ok(()) | Err(PipelineError::QueueFull) => {}
                Err(e) => {
                    error!(error = %e, "Pipeline rejected event");
                    return StreamEnd::Failed(FeedError::Closed);
                }
            }
        }
    }
}

async fn close_source(source: &mut dyn FrameSource) {
    if let Err(e) = source.close().await {
        warn!(error = %e, "Error closing feed");
    }
}

fn spawn_display(reader: Reader<BookRegistry>, display: DisplayConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(display.interval_ms.max(1)));
        loop {
            interval.tick().await;
            let Ok(snapshot) = reader.query(BookRegistry::serialize).await else { break };
            print_snapshot(&snapshot, display.json);
        }
    })
}

fn print_snapshot(snapshot: &BookSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to serialize books"),
        }
        return;
    }
    let mut books: Vec<&BookView> = snapshot.books.iter().collect();
    books.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    for book in books {
        println!("{}", top_of_book_line(book));
    }
}

fn top_of_book_line(book: &BookView) -> String {
    let side = |levels: &[LevelView]| match levels.first() {
        Some(l) => format!("{:.6} x {:.8}", l.price, l.qty),
        None => "-".to_string(),
    };
    let spread = match (book.bids.first(), book.asks.first()) {
        (Some(b), Some(a)) => format!("{:.6}", a.price - b.price),
        _ => "n/a".to_string(),
    };
    format!(
        "{} | BID {} ({} lvls) | ASK {} ({} lvls) | spread {}",
        book.symbol,
        side(&book.bids),
        book.bids.len(),
        side(&book.asks),
        book.asks.len(),
        spread
    )
}
