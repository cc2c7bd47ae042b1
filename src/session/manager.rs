use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::types::InboundEvent;
use crate::error::{ClientError, ClientResult, TransportError};
use crate::session::{Credential, Session, SessionState};
use crate::transport::Transport;

pub type ReadyHook = Box<dyn FnOnce(&Session) + Send>;

enum ReadyCheck {
    Pending,
    Ready(Session),
    // link died while authenticating; the session still needs releasing
    Closed(Session),
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    // A manager drives a single session; once started it never goes back to fresh
    started: bool,
}

/// Owns the connect -> logon -> ready -> disconnect state machine for one session.
pub struct SessionLifecycleManager {
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
    on_ready: Mutex<Option<ReadyHook>>,
    poll_interval: Duration,
}

impl SessionLifecycleManager {
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                session: None,
                started: false,
            }),
            on_ready: Mutex::new(None),
            poll_interval,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.lock().session.clone()
    }

    /// Registers the hook run on the `Ready` transition. Replaces any earlier hook.
    pub fn on_ready(&self, hook: impl FnOnce(&Session) + Send + 'static) {
        *self.on_ready.lock() = Some(Box::new(hook));
    }

    /// Connects the transport and sends the logon. The returned session is not
    /// usable until [`Self::await_ready`] succeeds.
    #[instrument(skip_all, fields(api_key = credential.api_key()))]
    pub async fn start(
        &self,
        credential: &Credential,
        events: mpsc::Sender<InboundEvent>,
    ) -> ClientResult<Session> {
        credential.validate()?;
        {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(ClientError::InvalidState { state: inner.state });
            }
            inner.started = true;
            inner.state = SessionState::Connecting;
        }
        info!("Connecting");

        let id = match self.transport.connect(credential, events).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to connect");
                self.inner.lock().state = SessionState::Disconnected;
                return Err(e.into());
            }
        };
        let session = Session::new(id);

        let raced_stop = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Connecting {
                inner.state = SessionState::Authenticating;
                inner.session = Some(session.clone());
                false
            } else {
                true
            }
        };
        if raced_stop {
            warn!(session = %session.id, "Stopped while connecting, dropping session");
            if let Err(e) = self.transport.disconnect(&session.id).await {
                warn!(error = %e, "Disconnect failed");
            }
            return Err(ClientError::InvalidState { state: SessionState::Disconnected });
        }

        info!(session = %session.id, "Logon sent, authenticating");
        Ok(session)
    }

    /// Waits until the session is logged on, re-checking once per poll interval.
    ///
    /// The ready hook runs on this task before the session is returned. A
    /// timeout leaves the session authenticating so the call can be retried.
    pub async fn await_ready(&self, timeout: Option<Duration>) -> ClientResult<Session> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.poll_ready())
                .await
                .map_err(|_| {
                    warn!(waited = ?limit, "Timed out waiting for logon");
                    ClientError::Timeout { waited: limit }
                })?,
            None => self.poll_ready().await,
        }
    }

    async fn poll_ready(&self) -> ClientResult<Session> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.check_ready()? {
                ReadyCheck::Ready(session) => return Ok(session),
                ReadyCheck::Pending => info!("Waiting for logged on..."),
                ReadyCheck::Closed(session) => {
                    error!(session = %session.id, "Session closed before logon completed");
                    // the link is dead but the transport may still hold its socket and tasks
                    if let Err(e) = self.transport.disconnect(&session.id).await {
                        warn!(error = %e, "Disconnect failed");
                    }
                    return Err(TransportError::Closed.into());
                }
            }
        }
    }

    fn check_ready(&self) -> ClientResult<ReadyCheck> {
        let (session, hook) = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Ready => {
                    return inner
                        .session
                        .clone()
                        .map(ReadyCheck::Ready)
                        .ok_or(ClientError::InvalidState { state: inner.state })
                }
                SessionState::Connecting => return Ok(ReadyCheck::Pending),
                SessionState::Disconnected => {
                    return Err(ClientError::NotReady { state: inner.state })
                }
                SessionState::Authenticating => {}
            }

            if self.transport.is_closed() {
                inner.state = SessionState::Disconnected;
                metrics::gauge!("venux_session_ready").set(0.0);
                return match inner.session.take() {
                    Some(session) => Ok(ReadyCheck::Closed(session)),
                    None => Err(TransportError::Closed.into()),
                };
            }
            if !self.transport.is_logged_on() {
                return Ok(ReadyCheck::Pending);
            }

            let Some(session) = inner.session.clone() else {
                return Err(ClientError::InvalidState { state: inner.state });
            };
            inner.state = SessionState::Ready;
            (session, self.on_ready.lock().take())
        };

        info!(session = %session.id, "Session ready");
        metrics::gauge!("venux_session_ready").set(1.0);
        if let Some(hook) = hook {
            hook(&session);
        }
        Ok(ReadyCheck::Ready(session))
    }

    /// Requests graceful termination. Idempotent; a stopped manager cannot be restarted.
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let session = {
            let mut inner = self.inner.lock();
            inner.started = true;
            inner.state = SessionState::Disconnected;
            inner.session.take()
        };
        metrics::gauge!("venux_session_ready").set(0.0);

        match session {
            Some(session) => {
                info!(session = %session.id, "Stopping session");
                if let Err(e) = self.transport.disconnect(&session.id).await {
                    warn!(error = %e, "Disconnect failed");
                }
            }
            None => debug!("Stop requested with no active session"),
        }
    }
}
