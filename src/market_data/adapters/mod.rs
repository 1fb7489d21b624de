// Shared traits + message classification for market data adapters

use std::collections::VecDeque;
use std::path::Path;

use crate::engine::types::OrderEvent;
use crate::market_data::error::{FeedError, FeedResult};

/// A decoded frame, classified by what the reconciliation protocol does with it.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Snapshot(Vec<OrderEvent>),
    Update(Vec<OrderEvent>),
    /// Acks, heartbeats, status: nothing for the book.
    Other,
}

impl FeedMessage {
    pub fn into_events(self) -> Vec<OrderEvent> {
        match self {
            FeedMessage::Snapshot(events) | FeedMessage::Update(events) => events,
            FeedMessage::Other => Vec::new(),
        }
    }
}

/// Source of raw text frames. `Ok(None)` means the peer closed cleanly.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> FeedResult<Option<String>>;

    async fn close(&mut self) -> FeedResult<()> {
        Ok(())
    }
}

/// Turns one raw frame into a [`FeedMessage`].
pub trait FrameDecoder: Send {
    fn classify(&mut self, frame: &str) -> FeedResult<FeedMessage>;
}

/// Frames held in memory, e.g. a recorded session replayed line by line.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<String>,
}

impl ReplaySource {
    pub fn new<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { frames: frames.into_iter().map(Into::into).collect() }
    }

    /// One frame per non-empty line.
    pub async fn from_file(path: &Path) -> FeedResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FeedError::Transport(format!("{}: {e}", path.display())))?;
        Ok(Self::new(text.lines().filter(|l| !l.trim().is_empty())))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait::async_trait]
impl FrameSource for ReplaySource {
    async fn next_frame(&mut self) -> FeedResult<Option<String>> {
        Ok(self.frames.pop_front())
    }
}

// Make the Kraken adapter visible
pub mod kraken;
pub mod kraken_types;
