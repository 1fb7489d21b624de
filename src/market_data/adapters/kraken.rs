// Kraken v2 level3 adapter: authenticated websocket, one subscription for all symbols.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace};

use super::kraken_types::{SubscribeMessage, SubscribeParams, WsEnvelope, WsMessage};
use super::{FeedMessage, FrameDecoder, FrameSource};
use crate::config::FeedConfig;
use crate::market_data::error::{FeedError, FeedResult};
use crate::market_data::normaliser::Normaliser;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct KrakenAdapter {
    pub url: String,     // "wss://ws-auth.kraken.com/v2"
    pub channel: String, // "level3"
    pub symbols: Vec<String>,
    pub snapshot: bool,
}

impl KrakenAdapter {
    pub fn new(feed: &FeedConfig) -> Self {
        Self {
            url: feed.url.clone(),
            channel: feed.channel.clone(),
            symbols: feed.symbols.clone(),
            snapshot: feed.snapshot,
        }
    }

    pub fn subscribe_message(&self, token: Option<&str>) -> serde_json::Result<String> {
        serde_json::to_string(&SubscribeMessage {
            method: "subscribe",
            params: SubscribeParams {
                channel: &self.channel,
                symbol: &self.symbols,
                snapshot: self.snapshot,
                token,
            },
        })
    }

    pub fn decoder(&self) -> KrakenDecoder {
        KrakenDecoder::new(&self.channel)
    }

    /// Opens the websocket and sends the subscription.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn connect(&self, token: Option<&str>) -> FeedResult<KrakenStream> {
        let (ws, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect { url: self.url.clone(), reason: e.to_string() })?;
        info!(status = %response.status(), "Connected to websocket");

        let (mut write, read) = ws.split();
        let subscribe = self.subscribe_message(token)?;
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        info!(channel = %self.channel, symbols = ?self.symbols, "Subscription sent");

        Ok(KrakenStream { write, read })
    }
}

pub struct KrakenStream {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl FrameSource for KrakenStream {
    async fn next_frame(&mut self) -> FeedResult<Option<String>> {
        while let Some(msg) = self.read.next().await {
            match msg.map_err(|e| FeedError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                    return Ok(Some(text));
                }
                Message::Close(frame) => {
                    info!(?frame, "WebSocket connection closed by server");
                    return Ok(None);
                }
                other => trace!(?other, "Skipping control frame"),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> FeedResult<()> {
        self.write
            .close()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))
    }
}

/// Classifies level3 frames by their `type` and normalises their orders.
#[derive(Debug)]
pub struct KrakenDecoder {
    channel: String,
    normaliser: Normaliser,
}

impl KrakenDecoder {
    pub fn new(channel: &str) -> Self {
        Self { channel: channel.to_string(), normaliser: Normaliser::new() }
    }

    pub fn normaliser(&self) -> &Normaliser {
        &self.normaliser
    }
}

impl FrameDecoder for KrakenDecoder {
    fn classify(&mut self, frame: &str) -> FeedResult<FeedMessage> {
        let envelope: WsEnvelope = serde_json::from_str(frame)?;
        if envelope.channel != self.channel {
            trace!(channel = %envelope.channel, "Ignoring frame");
            return Ok(FeedMessage::Other);
        }
        let snapshot = match envelope.kind.as_str() {
            "snapshot" => true,
            "update" => false,
            other => {
                debug!(kind = other, "Ignoring level3 frame");
                return Ok(FeedMessage::Other);
            }
        };
        let msg: WsMessage = serde_json::from_str(frame)?;
        let events = self.normaliser.events(&msg.data, snapshot);
        Ok(if snapshot { FeedMessage::Snapshot(events) } else { FeedMessage::Update(events) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EventKind, Side};

    const SNAPSHOT: &str = r#"{"channel":"level3","type":"snapshot","data":[{"symbol":"BTC/USD","checksum":281556855,
        "bids":[{"order_id":"OA1","limit_price":100.5,"order_qty":0.25,"timestamp":"2023-10-06T17:35:55.440295Z"}],
        "asks":[{"order_id":"OB1","limit_price":101.0,"order_qty":1.5,"timestamp":"2023-10-06T17:35:55.440295Z"}]}]}"#;

    const UPDATE: &str = r#"{"channel":"level3","type":"update","data":[{"symbol":"BTC/USD","checksum":1,
        "bids":[{"event":"delete","order_id":"OA1","limit_price":100.5,"order_qty":0.25}],
        "asks":[{"event":"add","order_id":"OB2","limit_price":101.2,"order_qty":3.0},
                {"event":"modify","order_id":"OB1","limit_price":101.0,"order_qty":0.5}]}]}"#;

    #[test]
    fn test_classify_snapshot() {
        let mut decoder = KrakenDecoder::new("level3");
        let FeedMessage::Snapshot(events) = decoder.classify(SNAPSHOT).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].side, Side::Bid);
        assert_eq!(events[0].kind, EventKind::Add);
        assert_eq!(events[1].id, "OB1");
        assert_eq!(events[1].qty, 1.5);
    }

    #[test]
    fn test_classify_update() {
        let mut decoder = KrakenDecoder::new("level3");
        let FeedMessage::Update(events) = decoder.classify(UPDATE).unwrap() else {
            panic!("expected update");
        };
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Remove, EventKind::Add, EventKind::Update]);
    }

    #[test]
    fn test_classify_other_frames() {
        let mut decoder = KrakenDecoder::new("level3");
        let ack = r#"{"method":"subscribe","result":{"channel":"level3","snapshot":true,"symbol":"BTC/USD"},"success":true}"#;
        assert_eq!(decoder.classify(ack).unwrap(), FeedMessage::Other);
        assert_eq!(decoder.classify(r#"{"channel":"heartbeat"}"#).unwrap(), FeedMessage::Other);
        assert_eq!(
            decoder.classify(r#"{"channel":"status","type":"update","data":[{"system":"online"}]}"#).unwrap(),
            FeedMessage::Other
        );
        assert!(matches!(decoder.classify("not json"), Err(FeedError::Decode(_))));
    }

    #[test]
    fn test_subscribe_message() {
        let feed = FeedConfig { symbols: vec!["BTC/USD".into(), "ETH/USD".into()], ..FeedConfig::default() };
        let adapter = KrakenAdapter::new(&feed);
        let msg: serde_json::Value =
            serde_json::from_str(&adapter.subscribe_message(Some("tok")).unwrap()).unwrap();
        assert_eq!(msg["method"], "subscribe");
        assert_eq!(msg["params"]["channel"], "level3");
        assert_eq!(msg["params"]["symbol"][1], "ETH/USD");
        assert_eq!(msg["params"]["snapshot"], true);
        assert_eq!(msg["params"]["token"], "tok");

        let anon: serde_json::Value =
            serde_json::from_str(&adapter.subscribe_message(None).unwrap()).unwrap();
        assert!(anon["params"].get("token").is_none());
    }
}
