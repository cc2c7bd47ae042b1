//! In-memory transport: no network, requests are recorded and events are injected by hand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Transport, TransportError};
use crate::engine::types::{InboundEvent, Request};
use crate::session::{Credential, SessionId};

pub struct LoopbackTransport {
    session_id: SessionId,
    reachable: bool,
    auto_logon: bool,
    connected: AtomicBool,
    logged_on: AtomicBool,
    closed: AtomicBool,
    disconnects: AtomicUsize,
    events: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    sent: Mutex<Vec<Request>>,
}

impl LoopbackTransport {
    /// Logon completes only when [`Self::complete_logon`] is called.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            reachable: true,
            auto_logon: false,
            connected: AtomicBool::new(false),
            logged_on: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    // Every connect attempt fails
    pub fn unreachable(session_id: impl Into<String>) -> Self {
        Self { reachable: false, ..Self::new(session_id) }
    }

    pub fn with_auto_logon(mut self) -> Self {
        self.auto_logon = true;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn complete_logon(&self) {
        self.logged_on.store(true, Ordering::SeqCst);
    }

    pub fn reject_logon(&self) {
        self.logged_on.store(false, Ordering::SeqCst);
        self.close();
    }

    /// Ends delivery as if the venue dropped the connection.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().take();
    }

    // Calls to Transport::disconnect so far
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Requests sent so far, oldest first.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    /// Pushes an event into the delivery channel, waiting for buffer space.
    pub async fn deliver(&self, event: InboundEvent) -> Result<(), TransportError> {
        let tx = self.events.lock().clone().ok_or(TransportError::NotConnected)?;
        tx.send(event).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        _credential: &Credential,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<SessionId, TransportError> {
        if !self.reachable {
            return Err(TransportError::Connect {
                url: "loopback".to_string(),
                reason: "unreachable".to_string(),
            });
        }
        *self.events.lock() = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        if self.auto_logon {
            self.complete_logon();
        }
        debug!(session = %self.session_id, "Loopback connected");
        Ok(self.session_id.clone())
    }

    fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, session: &SessionId, request: Request) -> Result<(), TransportError> {
        if !self.is_connected() || self.is_closed() || session != &self.session_id {
            return Err(TransportError::NotConnected);
        }
        debug!(op = request.op(), correlation_id = %request.correlation_id(), "Loopback send");
        self.sent.lock().push(request);
        Ok(())
    }

    async fn disconnect(&self, _session: &SessionId) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.logged_on.store(false, Ordering::SeqCst);
        self.close();
        Ok(())
    }
}
