#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed order {order_id}: {reason}")]
    MalformedInput { order_id: String, reason: String },

    #[error("token acquisition failed: {0}")]
    Token(String),

    #[error("feed closed")]
    Closed,
}

pub type FeedResult<T> = Result<T, FeedError>;
