use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    BUY,
    SELL,
}

// One level of an order book, already normalised to ticks/lots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64,
    pub quantity: u64,
}

impl PriceLevel {
    pub fn new(price: i64, quantity: u64) -> Self {
        Self { price, quantity }
    }
}

/// Full depth snapshot received atomically from the venue.
///
/// Bids are expected best (highest) first, asks best (lowest) first. Nothing here
/// enforces that; see [`crate::engine::validator::OrderBookValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub ts_ms: u64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    // ask - bid; negative or zero means the book is crossed
    pub fn spread(&self) -> Option<i64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: String,
    pub amount: String,
    pub ts_ms: u64,
}

// 24h rolling statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: String,
    pub high: String,
    pub low: String,
    pub volume: String,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub frozen: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub balances: Vec<Balance>,
}

/// FIX `OrdStatus`, carried on the wire by its single-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "0")]
    New,
    #[serde(rename = "1")]
    PartiallyFilled,
    #[serde(rename = "2")]
    Filled,
    #[serde(rename = "4")]
    Cancelled,
    #[serde(rename = "6")]
    PendingCancel,
    #[serde(rename = "8")]
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub order_id: u64,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub price: String,
    pub quantity: String,
    pub filled: String,
    #[serde(default)]
    pub text: Option<String>,
}

// Venue-side rejection of one of our requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub code: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    OrderBook(OrderBookSnapshot),
    Trades(Vec<Trade>),
    Ticker(Ticker),
    AccountInfo(AccountInfo),
    ExecutionReport(ExecutionReport),
    ErrorResponse(ErrorResponse),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::OrderBook(_) => EventKind::OrderBook,
            InboundEvent::Trades(_) => EventKind::Trades,
            InboundEvent::Ticker(_) => EventKind::Ticker,
            InboundEvent::AccountInfo(_) => EventKind::AccountInfo,
            InboundEvent::ExecutionReport(_) => EventKind::ExecutionReport,
            InboundEvent::ErrorResponse(_) => EventKind::ErrorResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderBook,
    Trades,
    Ticker,
    AccountInfo,
    ExecutionReport,
    ErrorResponse,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::OrderBook => "order_book",
            EventKind::Trades => "trades",
            EventKind::Ticker => "ticker",
            EventKind::AccountInfo => "account_info",
            EventKind::ExecutionReport => "execution_report",
            EventKind::ErrorResponse => "error_response",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token attached to an outbound request so the venue can echo it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// FIX `MassStatusReqType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MassStatusReqType {
    #[serde(rename = "1")]
    StatusForOrdersForSecurity,
    #[serde(rename = "7")]
    StatusForAllOrders,
}

// Outbound requests. Fire-and-forget: answers come back as InboundEvents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SubscribeOrderBook {
        id: CorrelationId,
        symbol: String,
    },
    SubscribeTrades {
        id: CorrelationId,
        symbol: String,
    },
    SubscribeTicker {
        id: CorrelationId,
        symbol: String,
    },
    AccountInfo {
        id: CorrelationId,
    },
    OrdersSince {
        id: CorrelationId,
        symbol: String,
        order_id: u64,
        status: OrderStatus,
    },
    OrderMassStatus {
        id: CorrelationId,
        mass_status_type: MassStatusReqType,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

impl Request {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Request::SubscribeOrderBook { id, .. }
            | Request::SubscribeTrades { id, .. }
            | Request::SubscribeTicker { id, .. }
            | Request::AccountInfo { id }
            | Request::OrdersSince { id, .. }
            | Request::OrderMassStatus { id, .. } => id,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Request::SubscribeOrderBook { .. } => "subscribe_order_book",
            Request::SubscribeTrades { .. } => "subscribe_trades",
            Request::SubscribeTicker { .. } => "subscribe_ticker",
            Request::AccountInfo { .. } => "account_info",
            Request::OrdersSince { .. } => "orders_since",
            Request::OrderMassStatus { .. } => "order_mass_status",
        }
    }
}
