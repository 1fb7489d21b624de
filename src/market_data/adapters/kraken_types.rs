// Source: wss://ws-auth.kraken.com/v2 (channel "level3")
use serde::{Deserialize, Serialize};

/// Just enough of a frame to decide what it is.
#[derive(Debug, Default, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub channel: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct WsMessage {
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Vec<Level3Data>,
}

#[derive(Debug, Deserialize)]
pub struct Level3Data {
    pub symbol: String,
    #[serde(default)]
    pub checksum: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub bids: Vec<WsOrder>,
    #[serde(default)]
    pub asks: Vec<WsOrder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsOrder {
    pub order_id: String,
    pub limit_price: f64,
    pub order_qty: f64,
    /// "add" | "modify" | "delete"; absent in snapshots.
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeMessage<'a> {
    pub method: &'static str,
    pub params: SubscribeParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams<'a> {
    pub channel: &'a str,
    pub symbol: &'a [String],
    pub snapshot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a str>,
}
