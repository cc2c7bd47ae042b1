// JSON frames spoken by the WebSocket transport.
// Inbound frames are tagged by "channel", outbound requests by "op".

use serde::{Deserialize, Serialize};

use crate::engine::types::{
    AccountInfo, ErrorResponse, ExecutionReport, InboundEvent, OrderBookSnapshot, PriceLevel,
    Ticker, Trade,
};
use crate::market_data::normaliser::{NormaliseError, Normaliser};

#[derive(Debug, Serialize)]
pub struct LoginFrame<'a> {
    pub op: &'static str, // always "login"
    pub api_key: &'a str,
    pub timestamp: u64,
    pub sign: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum WsInbound {
    Login(WsLogin),
    Depth(WsDepth),
    Trades { data: Vec<Trade> },
    Ticker(Ticker),
    Account(AccountInfo),
    ExecutionReport(ExecutionReport),
    Error(ErrorResponse),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct WsLogin {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WsDepth {
    pub symbol: String,
    pub bids: Vec<WsLevel>, // best first
    pub asks: Vec<WsLevel>,
    pub ts: u64,
}

// ["price", "size"] as decimal strings
#[derive(Debug, Deserialize)]
pub struct WsLevel(pub String, pub String);

impl WsDepth {
    pub fn normalise(self, normaliser: &Normaliser) -> Result<OrderBookSnapshot, NormaliseError> {
        Ok(OrderBookSnapshot {
            symbol: self.symbol,
            bids: norm_side(normaliser, &self.bids)?,
            asks: norm_side(normaliser, &self.asks)?,
            ts_ms: self.ts,
        })
    }
}

fn norm_side(norm: &Normaliser, side: &[WsLevel]) -> Result<Vec<PriceLevel>, NormaliseError> {
    side.iter()
        .map(|WsLevel(px, sz)| Ok(PriceLevel::new(norm.price_to_ticks(px)?, norm.size_to_lots(sz)?)))
        .collect()
}

/// What a decoded frame means to the session.
#[derive(Debug)]
pub enum Decoded {
    LoggedOn,
    LogonRejected(String),
    Event(InboundEvent),
    Ignored,
}

pub fn decode(text: &str, normaliser: &Normaliser) -> Result<Decoded, DecodeError> {
    let frame: WsInbound = serde_json::from_str(text)?;
    let decoded = match frame {
        WsInbound::Login(WsLogin { success: true, .. }) => Decoded::LoggedOn,
        WsInbound::Login(WsLogin { success: false, message }) => {
            Decoded::LogonRejected(message.unwrap_or_else(|| "no reason given".to_string()))
        }
        WsInbound::Depth(depth) => Decoded::Event(InboundEvent::OrderBook(depth.normalise(normaliser)?)),
        WsInbound::Trades { data } => Decoded::Event(InboundEvent::Trades(data)),
        WsInbound::Ticker(ticker) => Decoded::Event(InboundEvent::Ticker(ticker)),
        WsInbound::Account(account) => Decoded::Event(InboundEvent::AccountInfo(account)),
        WsInbound::ExecutionReport(report) => Decoded::Event(InboundEvent::ExecutionReport(report)),
        WsInbound::Error(err) => Decoded::Event(InboundEvent::ErrorResponse(err)),
        WsInbound::Unknown => Decoded::Ignored,
    };
    Ok(decoded)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad depth level: {0}")]
    Level(#[from] NormaliseError),
}
