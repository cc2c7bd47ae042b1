use itertools::Itertools;
use tracing::{debug, error, info, instrument};

use crate::engine::types::{OrderBookSnapshot, PriceLevel, Side};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookViolation {
    #[error("{side:?} side of the book is empty, best price is undefined")]
    EmptySide { side: Side },
    #[error("Lowest ask {best_ask} is not higher than the highest bid {best_bid}.")]
    Crossed { best_ask: i64, best_bid: i64 },
    #[error("bids should be sorted by limit price descending: level {index} at {price} follows {previous}")]
    BidsOutOfOrder { index: usize, previous: i64, price: i64 },
    #[error("asks should be sorted by limit price ascending: level {index} at {price} follows {previous}")]
    AsksOutOfOrder { index: usize, previous: i64, price: i64 },
}

impl BookViolation {
    /// Fatal violations stop processing; the rest are reported and skipped over.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BookViolation::EmptySide { .. } | BookViolation::Crossed { .. })
    }

    fn severity(&self) -> &'static str {
        if self.is_fatal() { "fatal" } else { "non_fatal" }
    }
}

// Non-fatal findings from a snapshot that passed the fatal checks
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<BookViolation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrderBookValidator;

impl OrderBookValidator {
    pub fn new() -> Self {
        Self
    }

    /// Checks the structural invariants of a depth snapshot.
    ///
    /// Out-of-order levels on either side are logged and collected in the
    /// returned report. An empty side or a crossed book is returned as `Err`.
    #[instrument(level = "debug", skip_all, fields(symbol = %snapshot.symbol))]
    pub fn validate(&self, snapshot: &OrderBookSnapshot) -> Result<ValidationReport, BookViolation> {
        info!(asks = snapshot.asks.len(), bids = snapshot.bids.len(), "Validating order book");

        let (best_bid, best_ask) = match (snapshot.best_bid(), snapshot.best_ask()) {
            (Some(bid), Some(ask)) => (bid, ask),
            (None, _) => return Err(Self::reject(BookViolation::EmptySide { side: Side::BUY })),
            (_, None) => return Err(Self::reject(BookViolation::EmptySide { side: Side::SELL })),
        };

        let mut report = ValidationReport::default();

        for level in &snapshot.bids {
            debug!(price = level.price, quantity = level.quantity, "Bid");
        }
        for ((_, prev), (index, level)) in snapshot.bids.iter().enumerate().tuple_windows() {
            if prev.price <= level.price {
                report.warnings.push(Self::warn(BookViolation::BidsOutOfOrder {
                    index,
                    previous: prev.price,
                    price: level.price,
                }));
            }
        }

        for level in &snapshot.asks {
            debug!(price = level.price, quantity = level.quantity, "Ask");
        }
        for ((_, prev), (index, level)) in snapshot.asks.iter().enumerate().tuple_windows() {
            if prev.price >= level.price {
                report.warnings.push(Self::warn(BookViolation::AsksOutOfOrder {
                    index,
                    previous: prev.price,
                    price: level.price,
                }));
            }
        }

        Self::log_top(&best_bid, &best_ask);

        if best_ask.price <= best_bid.price {
            return Err(Self::reject(BookViolation::Crossed {
                best_ask: best_ask.price,
                best_bid: best_bid.price,
            }));
        }

        debug!(warnings = report.warnings.len(), "Order book validated");
        Ok(report)
    }

    fn log_top(bid: &PriceLevel, ask: &PriceLevel) {
        info!(price = ask.price, quantity = ask.quantity, "lowest  ask");
        info!(price = bid.price, quantity = bid.quantity, "highest bid");
    }

    fn warn(violation: BookViolation) -> BookViolation {
        error!(error = %violation, "Order book out of order");
        metrics::counter!("venux_book_violations_total", "severity" => violation.severity()).increment(1);
        violation
    }

    fn reject(violation: BookViolation) -> BookViolation {
        error!(error = %violation, "Order book rejected");
        metrics::counter!("venux_book_violations_total", "severity" => violation.severity()).increment(1);
        violation
    }
}
