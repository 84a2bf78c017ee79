//! In-process realtime transport.
//!
//! `MemoryTransport` is handed to the code under test; the paired
//! `MemoryServer` plays the backend. Every socket the client opens shows up on
//! the server side as a [`ServerSocket`] via [`MemoryServer::accept`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use game_sync::protocol::ws::{ClientMsg, ServerMsg, PROTOCOL_VERSION};
use game_sync::transport::{Frame, Transport, TransportConn};
use game_sync::SyncError;
use parking_lot::Mutex;
use tokio::sync::mpsc;

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Script {
    opened_urls: Vec<String>,
    refuse_next: usize,
}

struct Shared {
    script: Mutex<Script>,
    incoming: mpsc::UnboundedSender<ServerSocket>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

pub struct MemoryServer {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<ServerSocket>,
}

impl MemoryTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MemoryTransport, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            script: Mutex::new(Script::default()),
            incoming: tx,
        });
        (
            MemoryTransport {
                shared: Arc::clone(&shared),
            },
            MemoryServer {
                shared,
                incoming: rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportConn>, SyncError> {
        {
            let mut script = self.shared.script.lock();
            script.opened_urls.push(url.to_string());
            if script.refuse_next > 0 {
                script.refuse_next -= 1;
                return Err(SyncError::transport("connection refused"));
            }
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let socket = ServerSocket {
            url: url.to_string(),
            from_client,
            to_client: Some(to_client),
        };
        self.shared
            .incoming
            .send(socket)
            .map_err(|_| SyncError::transport("memory server is gone"))?;

        Ok(Box::new(MemoryConn {
            to_server: Some(to_server),
            from_server,
        }))
    }
}

struct MemoryConn {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl TransportConn for MemoryConn {
    async fn send(&mut self, text: String) -> Result<(), SyncError> {
        let Some(tx) = &self.to_server else {
            return Err(SyncError::transport("socket closed"));
        };
        tx.send(text)
            .map_err(|_| SyncError::transport("server dropped the socket"))
    }

    async fn recv(&mut self) -> Option<Result<Frame, SyncError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.to_server = None;
    }
}

impl MemoryServer {
    /// Wait for the client's next socket.
    pub async fn accept(&mut self) -> ServerSocket {
        tokio::time::timeout(ACCEPT_TIMEOUT, self.incoming.recv())
            .await
            .expect("timed out waiting for the client to connect")
            .expect("memory transport dropped")
    }

    /// Accept the next socket and complete the handshake on it.
    pub async fn accept_handshake(&mut self, user_id: i64) -> ServerSocket {
        let mut socket = self.accept().await;
        socket.handshake(user_id).await;
        socket
    }

    /// A socket opened but not yet accepted, if any.
    pub fn try_accept(&mut self) -> Option<ServerSocket> {
        self.incoming.try_recv().ok()
    }

    /// Refuse the next `n` open attempts.
    pub fn refuse_next(&self, n: usize) {
        self.shared.script.lock().refuse_next = n;
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.shared.script.lock().opened_urls.clone()
    }
}

/// Server side of one client socket. Dropping it ends the client's stream.
pub struct ServerSocket {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<Frame>>,
}

impl ServerSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next client message, panicking on timeout or a closed socket.
    pub async fn recv(&mut self) -> ClientMsg {
        let text = tokio::time::timeout(RECV_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client closed the socket");
        serde_json::from_str(&text).expect("client sent an invalid message")
    }

    /// A client message already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<ClientMsg> {
        let text = self.from_client.try_recv().ok()?;
        Some(serde_json::from_str(&text).expect("client sent an invalid message"))
    }

    /// Expect `hello`, answer `hello_ack`, return the credential presented.
    pub async fn handshake(&mut self, user_id: i64) -> String {
        match self.recv().await {
            ClientMsg::Hello {
                protocol,
                credential,
            } => {
                assert_eq!(protocol, PROTOCOL_VERSION);
                self.send(&ServerMsg::HelloAck {
                    protocol: PROTOCOL_VERSION,
                    user_id,
                });
                credential
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }

    pub fn send(&self, msg: &ServerMsg) {
        let text = serde_json::to_string(msg).expect("server message serializes");
        self.send_raw(&text);
    }

    pub fn send_raw(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            // Client may already be gone
            let _ = tx.send(Frame::Text(text.to_string()));
        }
    }

    /// Send a close frame. The socket stays usable for assertions.
    pub fn close(&mut self, code: u16, reason: &str) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Frame::Closed {
                code: Some(code),
                reason: reason.to_string(),
            });
        }
    }

    /// End the stream without a close frame, like a dropped TCP connection.
    pub fn drop_connection(&mut self) {
        self.to_client = None;
    }
}
