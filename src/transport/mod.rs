// Shared trait for venue session transports

use tokio::sync::mpsc;

use crate::engine::types::{InboundEvent, Request};
pub use crate::error::TransportError;
use crate::session::{Credential, SessionId};

/// The protocol engine beneath a session.
///
/// Wire encoding, logon handshake and socket ownership live behind this trait.
/// Inbound events are pushed, one at a time and in arrival order, into the
/// sender handed to [`Transport::connect`]; dropping that sender ends delivery.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection and starts the logon handshake. Returns once the
    /// handshake has been sent, not when it has completed.
    async fn connect(
        &self,
        credential: &Credential,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<SessionId, TransportError>;

    fn is_logged_on(&self) -> bool;

    // True once the link is gone for good (closed by either side or logon rejected)
    fn is_closed(&self) -> bool;

    /// Queues a request for sending. Never waits on the network.
    fn send(&self, session: &SessionId, request: Request) -> Result<(), TransportError>;

    async fn disconnect(&self, session: &SessionId) -> Result<(), TransportError>;
}

pub mod loopback;
pub mod messages;
pub mod websocket;
