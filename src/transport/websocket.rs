// JSON-over-WebSocket transport

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{self, Decoded, LoginFrame};
use super::{Transport, TransportError};
use crate::config::TransportConfig;
use crate::engine::types::{InboundEvent, Request};
use crate::market_data::normaliser::Normaliser;
use crate::session::{Credential, SessionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

#[derive(Default)]
struct LinkState {
    logged_on: AtomicBool,
    closed: AtomicBool,
}

pub struct WebSocketTransport {
    config: TransportConfig,
    normaliser: Normaliser,
    link: Arc<LinkState>,
    outbound: Outbound,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        let normaliser = Normaliser::new(config.price_decimals, config.size_decimals);
        Self {
            config,
            normaliser,
            link: Arc::new(LinkState::default()),
            outbound: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::new(format!("{}->{}", self.config.sender_comp_id, self.config.target_comp_id))
    }

    // Drains queued frames into the socket and keeps the link alive with pings
    async fn write_loop(
        mut sink: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        heartbeat: Duration,
        link: Arc<LinkState>,
    ) {
        let mut ping = tokio::time::interval(heartbeat);
        ping.tick().await;
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                error!(error = %e, "Failed to write frame");
                break;
            }
            if closing {
                break;
            }
        }
        link.closed.store(true, Ordering::SeqCst);
        debug!("Writer finished");
    }

    // Decodes frames and forwards events, one at a time, in arrival order.
    // On exit the outbound queue is closed so the writer sends Close and drops the socket.
    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        normaliser: Normaliser,
        events: mpsc::Sender<InboundEvent>,
        link: Arc<LinkState>,
        outbound: Outbound,
    ) {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    info!(?frame, "WebSocket connection closed by server");
                    break;
                }
                Ok(other) => {
                    trace!(?other, "Received non-text frame");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Error reading from WebSocket");
                    break;
                }
            };

            match messages::decode(&text, &normaliser) {
                Ok(Decoded::LoggedOn) => {
                    info!("Logon accepted");
                    link.logged_on.store(true, Ordering::SeqCst);
                }
                Ok(Decoded::LogonRejected(reason)) => {
                    error!(%reason, "Logon rejected");
                    break;
                }
                Ok(Decoded::Event(event)) => {
                    if events.send(event).await.is_err() {
                        debug!("Event receiver dropped");
                        break;
                    }
                }
                Ok(Decoded::Ignored) => trace!(%text, "Ignoring frame"),
                Err(e) => warn!(error = %e, raw = %text, "Failed to decode frame"),
            }
        }
        link.logged_on.store(false, Ordering::SeqCst);
        if let Some(tx) = outbound.lock().take() {
            let _ = tx.send(Message::Close(None));
        }
        link.closed.store(true, Ordering::SeqCst);
        debug!("Reader finished");
    }

    fn queue(&self, msg: Message) -> Result<(), TransportError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(msg).map_err(|_| TransportError::Closed)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    #[instrument(skip_all, fields(url = %self.config.url))]
    async fn connect(
        &self,
        credential: &Credential,
        events: mpsc::Sender<InboundEvent>,
    ) -> Result<SessionId, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?;
        info!(status = %response.status(), "Connected");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let timestamp = now_ms();
        let login = LoginFrame {
            op: "login",
            api_key: credential.api_key(),
            timestamp,
            sign: credential.sign_logon(timestamp)?,
        };
        tx.send(Message::Text(serde_json::to_string(&login)?))
            .map_err(|_| TransportError::Closed)?;

        self.link.closed.store(false, Ordering::SeqCst);
        self.link.logged_on.store(false, Ordering::SeqCst);
        *self.outbound.lock() = Some(tx);

        let heartbeat = Duration::from_secs(self.config.heartbeat_secs.max(1));
        let writer = tokio::spawn(Self::write_loop(sink, rx, heartbeat, self.link.clone()));
        let reader = tokio::spawn(Self::read_loop(
            stream,
            self.normaliser,
            events,
            self.link.clone(),
            self.outbound.clone(),
        ));
        self.tasks.lock().extend([writer, reader]);

        let session = self.session_id();
        debug!(%session, "Logon sent");
        Ok(session)
    }

    fn is_logged_on(&self) -> bool {
        self.link.logged_on.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }

    fn send(&self, session: &SessionId, request: Request) -> Result<(), TransportError> {
        let text = serde_json::to_string(&request)?;
        debug!(%session, op = request.op(), correlation_id = %request.correlation_id(), "Sending request");
        self.queue(Message::Text(text))?;
        metrics::counter!("venux_requests_total", "op" => request.op()).increment(1);
        Ok(())
    }

    async fn disconnect(&self, session: &SessionId) -> Result<(), TransportError> {
        info!(%session, "Disconnecting");
        self.link.logged_on.store(false, Ordering::SeqCst);
        // None when the reader already shut the link down
        if let Some(tx) = self.outbound.lock().take() {
            let _ = tx.send(Message::Close(None));
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            debug!("No active connection to disconnect");
        }
        let mut tasks = tasks.into_iter();
        // writer flushes the close frame; the reader is dropped so delivery ends
        if let Some(writer) = tasks.next() {
            if tokio::time::timeout(Duration::from_secs(3), writer).await.is_err() {
                warn!("Timeout waiting for writer to flush, continuing with cleanup");
            }
        }
        for reader in tasks {
            reader.abort();
        }
        self.link.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::engine::types::CorrelationId;

    type VenueSocket = WebSocketStream<TcpStream>;

    fn config() -> TransportConfig {
        TransportConfig {
            url: "ws://127.0.0.1:1".to_string(),
            sender_comp_id: "CLIENT".to_string(),
            target_comp_id: "VENUE".to_string(),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn test_session_id_from_comp_ids() {
        assert_eq!(WebSocketTransport::new(config()).session_id().as_str(), "CLIENT->VENUE");
    }

    #[test]
    fn test_send_before_connect() {
        let transport = WebSocketTransport::new(config());
        let err = transport
            .send(&transport.session_id(), Request::AccountInfo { id: CorrelationId::new("1") })
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(!transport.is_logged_on());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let transport = WebSocketTransport::new(config());
        let (tx, _rx) = mpsc::channel(1);
        let err = transport.connect(&Credential::new("k", "s"), tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let transport = WebSocketTransport::new(config());
        transport.disconnect(&transport.session_id()).await.unwrap();
        assert!(transport.is_closed());
    }

    async fn listen() -> (TcpListener, TransportConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, TransportConfig { url, ..config() })
    }

    // Accepts one client, checks its signed login and answers it
    async fn accept_login(listener: &TcpListener, success: bool) -> VenueSocket {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let Some(Ok(Message::Text(login))) = ws.next().await else {
            panic!("expected a login frame");
        };
        let login: serde_json::Value = serde_json::from_str(&login).unwrap();
        assert_eq!(login["op"], "login");
        assert_eq!(login["api_key"], "k");
        assert_eq!(login["sign"].as_str().unwrap().len(), 64);
        ws.send(Message::Text(format!(r#"{{"channel":"login","success":{success}}}"#)))
            .await
            .unwrap();
        ws
    }

    // Frames received until the client sends Close or the socket goes away
    async fn drain(mut ws: VenueSocket) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            let closing = matches!(msg, Message::Close(_));
            frames.push(msg);
            if closing {
                break;
            }
        }
        frames
    }

    async fn eventually(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn error_code(event: Option<InboundEvent>) -> i32 {
        match event {
            Some(InboundEvent::ErrorResponse(err)) => err.code,
            other => panic!("expected an error response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_over_socket() {
        let (listener, config) = listen().await;
        let venue = tokio::spawn(async move {
            let mut ws = accept_login(&listener, true).await;
            for frame in [
                r#"{"channel":"error","code":1,"reason":"first"}"#,
                r#"{"channel":"pong"}"#,
                r#"{"channel":"error","code":2,"reason":"second"}"#,
            ] {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            drain(ws).await
        });

        let transport = WebSocketTransport::new(config);
        let (tx, mut rx) = mpsc::channel(8);
        let session = transport.connect(&Credential::new("k", "s"), tx).await.unwrap();
        eventually(|| transport.is_logged_on()).await;

        assert_eq!(error_code(rx.recv().await), 1);
        assert_eq!(error_code(rx.recv().await), 2);

        transport.send(&session, Request::AccountInfo { id: CorrelationId::new("acc-1") }).unwrap();
        transport.disconnect(&session).await.unwrap();

        assert_eq!(rx.recv().await, None);
        assert!(transport.is_closed());
        assert!(!transport.is_logged_on());
        assert!(matches!(
            transport.send(&session, Request::AccountInfo { id: CorrelationId::new("acc-2") }),
            Err(TransportError::NotConnected)
        ));

        let frames = venue.await.unwrap();
        assert!(matches!(
            frames.as_slice(),
            [Message::Text(request), Message::Close(_)] if request.contains("acc-1")
        ));
    }

    #[tokio::test]
    async fn test_rejected_logon_closes_socket() {
        let (listener, config) = listen().await;
        let venue = tokio::spawn(async move {
            let ws = accept_login(&listener, false).await;
            drain(ws).await
        });

        let transport = WebSocketTransport::new(config);
        let (tx, mut rx) = mpsc::channel(8);
        let session = transport.connect(&Credential::new("k", "s"), tx).await.unwrap();
        eventually(|| transport.is_closed()).await;

        assert!(!transport.is_logged_on());
        assert!(matches!(
            transport.send(&session, Request::AccountInfo { id: CorrelationId::new("late") }),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(rx.recv().await, None);

        // nothing but the close reaches the venue
        let frames = venue.await.unwrap();
        assert!(matches!(frames.as_slice(), [Message::Close(_)]), "{frames:?}");

        transport.disconnect(&session).await.unwrap();
        assert!(transport.is_closed());
    }
}
