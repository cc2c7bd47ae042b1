// Dispatcher routes inbound events to the single handler registered for their kind
use ahash::AHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};

use crate::engine::types::{
    AccountInfo, ErrorResponse, EventKind, ExecutionReport, InboundEvent, OrderBookSnapshot, Ticker,
    Trade,
};
use crate::error::ClientResult;
use crate::session::Session;

pub type Handler = Box<dyn FnMut(&InboundEvent, &Session) -> ClientResult<()> + Send>;

/// Routing table from event kind to handler.
///
/// One handler per kind: registering again for a kind replaces the previous
/// handler. Events with no handler are dropped. A handler error is returned
/// from [`EventDispatcher::dispatch`] untouched, and ends [`EventDispatcher::run`].
#[derive(Default)]
pub struct EventDispatcher {
    handlers: AHashMap<EventKind, Handler>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an earlier handler for `kind` was replaced.
    pub fn register<F>(&mut self, kind: EventKind, handler: F) -> bool
    where
        F: FnMut(&InboundEvent, &Session) -> ClientResult<()> + Send + 'static,
    {
        let replaced = self.handlers.insert(kind, Box::new(handler)).is_some();
        if replaced {
            debug!(%kind, "Replacing handler");
        }
        replaced
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn on_order_book<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&OrderBookSnapshot, &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::OrderBook, move |event, session| match event {
            InboundEvent::OrderBook(book) => handler(book, session),
            _ => Ok(()),
        })
    }

    pub fn on_trades<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&[Trade], &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::Trades, move |event, session| match event {
            InboundEvent::Trades(trades) => handler(trades, session),
            _ => Ok(()),
        })
    }

    pub fn on_ticker<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&Ticker, &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::Ticker, move |event, session| match event {
            InboundEvent::Ticker(ticker) => handler(ticker, session),
            _ => Ok(()),
        })
    }

    pub fn on_account_info<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&AccountInfo, &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::AccountInfo, move |event, session| match event {
            InboundEvent::AccountInfo(info) => handler(info, session),
            _ => Ok(()),
        })
    }

    pub fn on_execution_report<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&ExecutionReport, &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::ExecutionReport, move |event, session| match event {
            InboundEvent::ExecutionReport(report) => handler(report, session),
            _ => Ok(()),
        })
    }

    pub fn on_error_response<F>(&mut self, mut handler: F) -> bool
    where
        F: FnMut(&ErrorResponse, &Session) -> ClientResult<()> + Send + 'static,
    {
        self.register(EventKind::ErrorResponse, move |event, session| match event {
            InboundEvent::ErrorResponse(err) => handler(err, session),
            _ => Ok(()),
        })
    }

    pub fn dispatch(&mut self, event: &InboundEvent, session: &Session) -> ClientResult<()> {
        let kind = event.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                trace!(%kind, session = %session.id, "Dispatching event");
                metrics::counter!("venux_events_total", "kind" => kind.as_str()).increment(1);
                handler(event, session)
            }
            None => {
                debug!(%kind, "No handler registered, dropping event");
                metrics::counter!("venux_events_dropped_total", "kind" => kind.as_str()).increment(1);
                Ok(())
            }
        }
    }

    /// Delivers events serially until the transport drops its sender or a
    /// handler fails.
    #[instrument(skip_all, fields(session = %session.id))]
    pub async fn run(
        mut self,
        session: Session,
        mut events: mpsc::Receiver<InboundEvent>,
    ) -> ClientResult<()> {
        let mut delivered: u64 = 0;
        while let Some(event) = events.recv().await {
            self.dispatch(&event, &session)?;
            delivered += 1;
        }
        info!(delivered, "Event delivery finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::engine::types::{CorrelationId, PriceLevel};
    use crate::error::ClientError;
    use crate::session::SessionId;

    fn session() -> Session {
        Session::new(SessionId::new("CLIENT->VENUE"))
    }

    fn book() -> InboundEvent {
        InboundEvent::OrderBook(OrderBookSnapshot {
            symbol: "BTC/CNY".to_string(),
            bids: vec![PriceLevel::new(10, 1)],
            asks: vec![PriceLevel::new(11, 1)],
            ts_ms: 0,
        })
    }

    fn error_response() -> InboundEvent {
        InboundEvent::ErrorResponse(ErrorResponse {
            correlation_id: Some(CorrelationId::new("c")),
            code: 1,
            reason: "nope".to_string(),
        })
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnMut(&InboundEvent, &Session) -> ClientResult<()> + Send + 'static {
        let counter = counter.clone();
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_unregistered_kind_is_dropped() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(EventKind::OrderBook, counting(&a));
        dispatcher.register(EventKind::Trades, counting(&b));

        dispatcher.dispatch(&error_response(), &session()).unwrap();
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&book(), &session()).unwrap();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        assert!(!dispatcher.register(EventKind::OrderBook, counting(&first)));
        assert!(dispatcher.register(EventKind::OrderBook, counting(&second)));

        dispatcher.dispatch(&book(), &session()).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typed_handler_receives_payload_and_session() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_error_response(move |err, session| {
            sink.lock().push((err.reason.clone(), session.id.to_string()));
            Ok(())
        });
        assert!(dispatcher.is_registered(EventKind::ErrorResponse));

        dispatcher.dispatch(&error_response(), &session()).unwrap();
        assert_eq!(*seen.lock(), vec![("nope".to_string(), "CLIENT->VENUE".to_string())]);
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_order_book(|_, _| {
            Err(ClientError::Handler { kind: EventKind::OrderBook, message: "boom".to_string() })
        });
        let err = dispatcher.dispatch(&book(), &session()).unwrap_err();
        assert!(matches!(err, ClientError::Handler { kind: EventKind::OrderBook, .. }));
    }

    #[tokio::test]
    async fn test_run_delivers_in_order_until_sender_dropped() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(EventKind::OrderBook, {
            let sink = sink.clone();
            move |event, _| {
                sink.lock().push(event.kind());
                Ok(())
            }
        });
        dispatcher.register(EventKind::ErrorResponse, move |event, _| {
            sink.lock().push(event.kind());
            Ok(())
        });

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(dispatcher.run(session(), rx));
        tx.send(book()).await.unwrap();
        tx.send(error_response()).await.unwrap();
        tx.send(book()).await.unwrap();
        drop(tx);

        task.await.unwrap().unwrap();
        assert_eq!(
            *seen.lock(),
            vec![EventKind::OrderBook, EventKind::ErrorResponse, EventKind::OrderBook]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_handler_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on_order_book(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Handler { kind: EventKind::OrderBook, message: "fatal".to_string() })
        });

        let (tx, rx) = mpsc::channel(8);
        tx.send(book()).await.unwrap();
        tx.send(book()).await.unwrap();
        let result = dispatcher.run(session(), rx).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
