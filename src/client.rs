//! Public client surface: connect a session, subscribe to feeds, send queries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::config::DemoConfig;
use crate::engine::types::{CorrelationId, MassStatusReqType, OrderStatus, Request};
use crate::engine::validator::OrderBookValidator;
use crate::error::{ClientError, ClientResult};
use crate::market_data::dispatcher::EventDispatcher;
use crate::session::{
    Credential, RequestIdGenerator, Session, SessionLifecycleManager, SessionState,
};
use crate::transport::Transport;

// Identifier above i32::MAX, sent by the demo to catch truncating venues/codecs
pub const WIDE_ORDER_ID: u64 = 2_147_488_076;

pub type Delivery = JoinHandle<ClientResult<()>>;

pub struct ClientFacade {
    transport: Arc<dyn Transport>,
    manager: SessionLifecycleManager,
    ids: RequestIdGenerator,
    event_buffer: usize,
}

impl ClientFacade {
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration, event_buffer: usize) -> Self {
        Self {
            manager: SessionLifecycleManager::new(transport.clone(), poll_interval),
            transport,
            ids: RequestIdGenerator::new(),
            event_buffer: event_buffer.max(1),
        }
    }

    pub fn manager(&self) -> &SessionLifecycleManager {
        &self.manager
    }

    /// Starts the session, spawns event delivery into `dispatcher`, and waits
    /// for logon. Once ready, a status query for all orders goes out before
    /// this returns.
    ///
    /// The returned handle resolves when delivery ends; an `Err` there is a
    /// fatal handler error.
    #[instrument(skip_all)]
    pub async fn connect(
        &self,
        credential: &Credential,
        dispatcher: EventDispatcher,
        ready_timeout: Option<Duration>,
    ) -> ClientResult<Delivery> {
        let transport = self.transport.clone();
        let ids = self.ids;
        self.manager.on_ready(move |session| {
            let request = Request::OrderMassStatus {
                id: ids.next(),
                mass_status_type: MassStatusReqType::StatusForAllOrders,
                symbol: None,
            };
            if let Err(e) = issue(transport.as_ref(), session, request) {
                error!(error = %e, "Failed to request status for all orders");
            }
        });

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let session = self.manager.start(credential, tx).await?;
        let delivery = tokio::spawn(dispatcher.run(session, rx));

        match self.manager.await_ready(ready_timeout).await {
            Ok(_) => Ok(delivery),
            Err(e) => {
                self.manager.stop().await;
                Err(e)
            }
        }
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    fn ready_session(&self) -> ClientResult<Session> {
        self.manager
            .session()
            .filter(|_| self.manager.state() == SessionState::Ready)
            .ok_or(ClientError::NotReady { state: self.manager.state() })
    }

    fn send(&self, build: impl FnOnce(CorrelationId) -> Request) -> ClientResult<CorrelationId> {
        let session = self.ready_session()?;
        let request = build(self.ids.next());
        let id = request.correlation_id().clone();
        issue(self.transport.as_ref(), &session, request)?;
        Ok(id)
    }

    pub fn subscribe_order_book(&self, symbol: &str) -> ClientResult<CorrelationId> {
        self.send(|id| Request::SubscribeOrderBook { id, symbol: symbol.to_string() })
    }

    pub fn subscribe_trades(&self, symbol: &str) -> ClientResult<CorrelationId> {
        self.send(|id| Request::SubscribeTrades { id, symbol: symbol.to_string() })
    }

    pub fn subscribe_ticker(&self, symbol: &str) -> ClientResult<CorrelationId> {
        self.send(|id| Request::SubscribeTicker { id, symbol: symbol.to_string() })
    }

    pub fn request_account_info(&self) -> ClientResult<CorrelationId> {
        self.send(|id| Request::AccountInfo { id })
    }

    /// Orders at or after `order_id` with the given status.
    pub fn request_orders_since(
        &self,
        symbol: &str,
        order_id: u64,
        status: OrderStatus,
    ) -> ClientResult<CorrelationId> {
        self.send(|id| Request::OrdersSince { id, symbol: symbol.to_string(), order_id, status })
    }

    pub fn request_all_orders_status(&self) -> ClientResult<CorrelationId> {
        self.send(|id| Request::OrderMassStatus {
            id,
            mass_status_type: MassStatusReqType::StatusForAllOrders,
            symbol: None,
        })
    }

    pub fn request_security_orders_status(&self, symbol: &str) -> ClientResult<CorrelationId> {
        self.send(|id| Request::OrderMassStatus {
            id,
            mass_status_type: MassStatusReqType::StatusForOrdersForSecurity,
            symbol: Some(symbol.to_string()),
        })
    }

    /// Scripted walk through every request type.
    #[instrument(skip_all, fields(symbol = %demo.symbol))]
    pub fn demo(&self, demo: &DemoConfig) -> ClientResult<()> {
        let symbol = demo.symbol.as_str();
        self.subscribe_order_book(symbol)?;
        self.subscribe_trades(symbol)?;
        self.subscribe_ticker(symbol)?;
        self.request_account_info()?;
        self.request_orders_since(symbol, demo.first_order_id, demo.order_status)?;
        self.request_orders_since(symbol, WIDE_ORDER_ID, demo.order_status)?;
        self.request_security_orders_status(symbol)?;
        info!("Demo requests sent");
        Ok(())
    }
}

fn issue(transport: &dyn Transport, session: &Session, request: Request) -> ClientResult<()> {
    info!(op = request.op(), correlation_id = %request.correlation_id(), "Request");
    transport.send(&session.id, request)?;
    Ok(())
}

/// Dispatcher that logs every event and validates order books, failing the
/// run on a crossed or one-sided book.
pub fn logging_dispatcher(validator: OrderBookValidator) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.on_order_book(move |book, _| {
        validator.validate(book)?;
        Ok(())
    });
    dispatcher.on_trades(|trades, _| {
        for trade in trades {
            info!(?trade, "Trade");
        }
        Ok(())
    });
    dispatcher.on_ticker(|ticker, _| {
        info!(?ticker, "Ticker");
        Ok(())
    });
    dispatcher.on_account_info(|account, _| {
        info!(?account, "AccountInfo");
        Ok(())
    });
    dispatcher.on_execution_report(|report, _| {
        info!(?report, "ExecutionReport");
        Ok(())
    });
    dispatcher.on_error_response(|err, _| {
        error!(correlation_id = ?err.correlation_id, code = err.code, reason = %err.reason, "Error response");
        Ok(())
    });
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EventKind, InboundEvent, OrderBookSnapshot, PriceLevel};
    use crate::session::SessionId;
    use crate::transport::loopback::LoopbackTransport;

    fn client(transport: &Arc<LoopbackTransport>) -> ClientFacade {
        ClientFacade::new(transport.clone(), Duration::from_millis(10), 16)
    }

    #[tokio::test]
    async fn test_requests_need_ready_session() {
        let transport = Arc::new(LoopbackTransport::new("A->B"));
        let client = client(&transport);
        let err = client.subscribe_order_book("BTC/CNY").unwrap_err();
        assert!(matches!(err, ClientError::NotReady { state: SessionState::Disconnected }));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ready_hook_requests_all_orders() {
        let transport = Arc::new(LoopbackTransport::new("A->B").with_auto_logon());
        let client = client(&transport);
        client
            .connect(&Credential::new("k", "s"), EventDispatcher::new(), Some(Duration::from_secs(1)))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0],
            Request::OrderMassStatus { mass_status_type: MassStatusReqType::StatusForAllOrders, symbol: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_each_request_gets_its_own_id() {
        let transport = Arc::new(LoopbackTransport::new("A->B").with_auto_logon());
        let client = client(&transport);
        client.connect(&Credential::new("k", "s"), EventDispatcher::new(), None).await.unwrap();

        let a = client.request_all_orders_status().unwrap();
        let b = client.request_security_orders_status("BTC/CNY").unwrap();
        assert_ne!(a, b);

        let sent = transport.sent();
        assert_eq!(sent.last().unwrap().correlation_id(), &b);
        assert_eq!(sent[sent.len() - 2].correlation_id(), &a);
    }

    #[tokio::test]
    async fn test_connect_timeout_stops_session() {
        let transport = Arc::new(LoopbackTransport::new("A->B"));
        let client = client(&transport);
        let err = client
            .connect(&Credential::new("k", "s"), EventDispatcher::new(), Some(Duration::from_millis(40)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(client.manager().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejected_logon_releases_transport() {
        let transport = Arc::new(LoopbackTransport::new("A->B"));
        let client = client(&transport);
        let rejecter = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            rejecter.reject_logon();
        });

        let err = client
            .connect(&Credential::new("k", "s"), EventDispatcher::new(), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TransportUnavailable(_)));
        assert_eq!(transport.disconnects(), 1);
        assert!(client.request_account_info().is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_logging_dispatcher_fails_on_crossed_book() {
        let mut dispatcher = logging_dispatcher(OrderBookValidator::new());
        let session = Session::new(SessionId::new("A->B"));
        let crossed = InboundEvent::OrderBook(OrderBookSnapshot {
            symbol: "BTC/CNY".to_string(),
            bids: vec![PriceLevel::new(101, 1)],
            asks: vec![PriceLevel::new(100, 1)],
            ts_ms: 0,
        });
        assert!(matches!(
            dispatcher.dispatch(&crossed, &session),
            Err(ClientError::InvariantViolation(_))
        ));
        assert!(dispatcher.is_registered(EventKind::ExecutionReport));
    }
}
