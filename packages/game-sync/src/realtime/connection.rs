//! Realtime connection manager.
//!
//! One background task per connect cycle owns the socket. It fetches a
//! short-lived credential, performs the `hello`/`hello_ack` handshake, then
//! pumps outbound and inbound frames until the socket drops, at which point it
//! backs off and starts over. [`ConnectionManager::disconnect`] cancels the
//! task; a cancelled task never touches the published state again.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::http::api::{GameApi, WsToken};
use crate::protocol::ws::{ClientMsg, ServerMsg, PROTOCOL_VERSION};
use crate::realtime::backoff::delay_for;
use crate::sync::error_state::{ErrorSlot, ErrorSource, ErrorState};
use crate::transport::{Frame, Transport, TransportConn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Details of a completed handshake, passed to connect listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedInfo {
    /// Increments on every successful handshake.
    pub generation: u64,
    pub user_id: i64,
    pub protocol: i32,
}

pub type MessageHandler = Arc<dyn Fn(&ServerMsg) -> Result<(), SyncError> + Send + Sync>;
pub type ConnectListener = Arc<dyn Fn(&ConnectedInfo) + Send + Sync>;

/// The running connect cycle, if any.
struct Link {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<ClientMsg>,
    task: JoinHandle<()>,
}

struct Inner {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    api: Arc<dyn GameApi>,
    errors: ErrorSlot,
    state_tx: watch::Sender<ConnectionState>,
    handlers: Mutex<Vec<(Uuid, MessageHandler)>>,
    listeners: Mutex<Vec<(Uuid, ConnectListener)>>,
    generation: AtomicU64,
    next_link: AtomicU64,
    link: Mutex<Option<Link>>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

enum SessionEnd {
    Cancelled,
    Failed { error: SyncError, established: bool },
}

impl ConnectionManager {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        api: Arc<dyn GameApi>,
        errors: ErrorSlot,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                api,
                errors,
                state_tx,
                handlers: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                next_link: AtomicU64::new(1),
                link: Mutex::new(None),
            }),
        }
    }

    /// Start connecting. No-op while a connect cycle is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut link = self.inner.link.lock();
        if link.as_ref().is_some_and(|l| !l.task.is_finished()) {
            debug!(state = self.state().as_str(), "[WS CLIENT] connect ignored, already active");
            return;
        }

        let id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_loop(inner, id, cancel.clone(), outbound_rx));
        *link = Some(Link {
            id,
            cancel,
            outbound,
            task,
        });
    }

    /// Close the connection deliberately. No reconnect follows.
    pub fn disconnect(&self) {
        let mut link = self.inner.link.lock();
        if let Some(link) = link.take() {
            info!(link = link.id, "[WS CLIENT] disconnecting");
            link.cancel.cancel();
        }
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Queue a message for the open socket. Fails unless connected.
    ///
    /// Returns the generation of the connection the message was queued on.
    pub fn send(&self, msg: ClientMsg) -> Result<u64, SyncError> {
        let link = self.inner.link.lock();
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::transport(format!(
                "cannot send {}: not connected",
                msg.kind()
            )));
        }
        let Some(link) = link.as_ref() else {
            return Err(SyncError::transport("cannot send: no connection"));
        };
        link.outbound
            .send(msg)
            .map_err(|_| SyncError::transport("connection task has stopped"))?;
        Ok(self.generation())
    }

    /// Deliver every inbound application message after the handshake to
    /// `handler`. Handlers run in registration order; one failing does not
    /// stop delivery to the rest.
    pub fn register_handler<F>(&self, handler: F) -> Registration
    where
        F: Fn(&ServerMsg) -> Result<(), SyncError> + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner.handlers.lock().push((id, Arc::new(handler)));
        Registration {
            inner: Arc::downgrade(&self.inner),
            id,
            kind: RegistrationKind::Handler,
        }
    }

    /// Run `listener` each time a handshake completes, before any frame of
    /// the new connection is read.
    pub fn on_connected<F>(&self, listener: F) -> Registration
    where
        F: Fn(&ConnectedInfo) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Registration {
            inner: Arc::downgrade(&self.inner),
            id,
            kind: RegistrationKind::Listener,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Generation of the current (or most recent) connection; 0 before the first.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> &ErrorSlot {
        &self.inner.errors
    }
}

#[derive(Debug, Clone, Copy)]
enum RegistrationKind {
    Handler,
    Listener,
}

/// Returned by [`ConnectionManager::register_handler`] and
/// [`ConnectionManager::on_connected`]. Dropping it keeps the registration.
#[must_use = "dropping a Registration leaves the callback registered forever"]
pub struct Registration {
    inner: Weak<Inner>,
    id: Uuid,
    kind: RegistrationKind,
}

impl Registration {
    pub fn unregister(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match self.kind {
            RegistrationKind::Handler => inner.handlers.lock().retain(|(id, _)| *id != self.id),
            RegistrationKind::Listener => inner.listeners.lock().retain(|(id, _)| *id != self.id),
        }
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    link_id: u64,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<ClientMsg>,
) {
    let conn_id = Uuid::new_v4();
    let mut attempt = 0u32;
    let mut reconnecting = false;

    loop {
        let (error, source) = match until_cancelled(&cancel, inner.fetch_credential()).await {
            None => return,
            Some(Ok(token)) => match inner
                .run_session(link_id, conn_id, &cancel, &mut outbound, token)
                .await
            {
                SessionEnd::Cancelled => return,
                SessionEnd::Failed { error, established } => {
                    if established {
                        attempt = 0;
                    }
                    (error, ErrorSource::Websocket)
                }
            },
            Some(Err(err)) if reconnecting && err.is_unreachable() => {
                warn!(
                    %conn_id,
                    code = %err.code(),
                    error = %err,
                    "[WS CLIENT] credential request failed while reconnecting, will retry"
                );
                (err, ErrorSource::Http)
            }
            Some(Err(err)) => {
                warn!(
                    %conn_id,
                    code = %err.code(),
                    trace_id = ?err.trace_id(),
                    error = %err,
                    "[WS CLIENT] credential request failed, giving up until next connect"
                );
                inner
                    .errors
                    .set(ErrorState::from_error(&err, ErrorSource::Http));
                inner.release(link_id);
                return;
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        inner.errors.set(ErrorState::from_error(&error, source));
        if !inner.transition(link_id, ConnectionState::Reconnecting) {
            return;
        }
        reconnecting = true;

        attempt = attempt.saturating_add(1);
        let delay = delay_for(&inner.config.backoff, attempt);
        warn!(
            %conn_id,
            attempt,
            retry_delay_secs = delay.as_secs_f64(),
            error = %error,
            "[WS CLIENT] connection lost, reconnecting"
        );
        if until_cancelled(&cancel, sleep(delay)).await.is_none() {
            return;
        }
        if !inner.transition(link_id, ConnectionState::Connecting) {
            return;
        }
    }
}

impl Inner {
    /// Publish `state` if `link_id` is still the live, uncancelled link.
    fn transition(&self, link_id: u64, state: ConnectionState) -> bool {
        let link = self.link.lock();
        match link.as_ref() {
            Some(l) if l.id == link_id && !l.cancel.is_cancelled() => {
                self.state_tx.send_replace(state);
                true
            }
            _ => false,
        }
    }

    /// Forget `link_id` after its task gave up, so a later `connect` starts fresh.
    fn release(&self, link_id: u64) {
        let mut link = self.link.lock();
        if link.as_ref().is_some_and(|l| l.id == link_id) {
            *link = None;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    async fn fetch_credential(&self) -> Result<WsToken, SyncError> {
        let limit = self.config.credential_timeout;
        match timeout(limit, self.api.issue_ws_token()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(format!(
                "credential request timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    async fn run_session(
        &self,
        link_id: u64,
        conn_id: Uuid,
        cancel: &CancellationToken,
        outbound: &mut mpsc::UnboundedReceiver<ClientMsg>,
        token: WsToken,
    ) -> SessionEnd {
        let failed = |error| SessionEnd::Failed {
            error,
            established: false,
        };

        let url = match socket_url(&self.config.ws_url, &token.token) {
            Ok(url) => url,
            Err(error) => return failed(error),
        };
        let mut conn = match until_cancelled(cancel, self.transport.open(&url)).await {
            None => return SessionEnd::Cancelled,
            Some(Err(error)) => return failed(error),
            Some(Ok(conn)) => conn,
        };

        let hello = ClientMsg::Hello {
            protocol: PROTOCOL_VERSION,
            credential: token.token,
        };
        if let Err(error) = send_msg(conn.as_mut(), &hello).await {
            return failed(error);
        }

        let handshake = timeout(self.config.handshake_timeout, await_hello_ack(conn.as_mut()));
        let (user_id, protocol) = match until_cancelled(cancel, handshake).await {
            None => {
                conn.close().await;
                return SessionEnd::Cancelled;
            }
            Some(Err(_)) => return failed(SyncError::handshake("timed out waiting for hello_ack")),
            Some(Ok(Err(error))) => return failed(error),
            Some(Ok(Ok(ack))) => ack,
        };

        // Anything queued for a previous socket is obsolete
        while outbound.try_recv().is_ok() {}

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.transition(link_id, ConnectionState::Connected) {
            conn.close().await;
            return SessionEnd::Cancelled;
        }
        self.errors.clear();
        info!(%conn_id, generation, user_id, protocol, "[WS CLIENT] connected");

        self.notify_connected(&ConnectedInfo {
            generation,
            user_id,
            protocol,
        });

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    conn.close().await;
                    return SessionEnd::Cancelled;
                }
                Some(msg) = outbound.recv() => {
                    debug!(%conn_id, kind = msg.kind(), "[WS CLIENT] sending");
                    if let Err(error) = send_msg(conn.as_mut(), &msg).await {
                        return SessionEnd::Failed { error, established: true };
                    }
                }
                frame = conn.recv() => {
                    let error = match frame {
                        Some(Ok(Frame::Text(text))) => {
                            self.dispatch(conn_id, &text);
                            continue;
                        }
                        Some(Ok(Frame::Closed { code, reason })) => SyncError::transport(format!(
                            "closed by server (code {}): {reason}",
                            code.map_or_else(|| "none".to_string(), |c| c.to_string())
                        )),
                        Some(Err(error)) => error,
                        None => SyncError::transport("connection closed"),
                    };
                    return SessionEnd::Failed { error, established: true };
                }
            }
        }
    }

    fn notify_connected(&self, info: &ConnectedInfo) {
        let listeners: Vec<ConnectListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(info))).is_err() {
                error!(generation = info.generation, "[WS CLIENT] connect listener panicked");
            }
        }
    }

    fn dispatch(&self, conn_id: Uuid, text: &str) {
        let msg: ServerMsg = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%conn_id, error = %err, "[WS CLIENT] dropping malformed frame");
                return;
            }
        };
        debug!(%conn_id, kind = msg.kind(), "[WS CLIENT] received");

        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&msg))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(%conn_id, kind = msg.kind(), error = %err, "[WS CLIENT] handler failed");
                }
                Err(_) => {
                    error!(%conn_id, kind = msg.kind(), "[WS CLIENT] handler panicked");
                }
            }
        }
    }
}

fn socket_url(base: &str, token: &str) -> Result<String, SyncError> {
    let mut url = Url::parse(base)
        .map_err(|err| SyncError::config(format!("invalid websocket url {base}: {err}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

async fn send_msg(conn: &mut dyn TransportConn, msg: &ClientMsg) -> Result<(), SyncError> {
    let text = serde_json::to_string(msg)?;
    conn.send(text).await
}

async fn await_hello_ack(conn: &mut dyn TransportConn) -> Result<(i64, i32), SyncError> {
    loop {
        let text = match conn.recv().await {
            Some(Ok(Frame::Text(text))) => text,
            Some(Ok(Frame::Closed { reason, .. })) => {
                return Err(SyncError::handshake(format!(
                    "closed during handshake: {reason}"
                )));
            }
            Some(Err(err)) => return Err(err),
            None => return Err(SyncError::handshake("connection ended during handshake")),
        };
        match serde_json::from_str::<ServerMsg>(&text) {
            Ok(ServerMsg::HelloAck { protocol, user_id }) => {
                if protocol != PROTOCOL_VERSION {
                    return Err(SyncError::handshake(format!(
                        "server speaks protocol {protocol}, expected {PROTOCOL_VERSION}"
                    )));
                }
                return Ok((user_id, protocol));
            }
            Ok(ServerMsg::Error { code, message }) => {
                return Err(SyncError::handshake(format!(
                    "{}: {message}",
                    code.as_str()
                )));
            }
            Ok(other) => {
                debug!(kind = other.kind(), "[WS CLIENT] ignoring message before hello_ack");
            }
            Err(err) => {
                warn!(error = %err, "[WS CLIENT] dropping malformed frame during handshake");
            }
        }
    }
}
