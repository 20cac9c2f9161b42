//! WebSocket game server implementation.
//!
//! Each socket gets its own task. The bearer token travels in the
//! `Sec-WebSocket-Protocol` header as `Bearer.<token>`; once it is verified
//! and the character is loaded, the task hands the connection to the game
//! loop as a [`NetEvent::Joined`] and forwards text frames until the socket
//! closes.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use super::connection::{Connection, Outbound, CLOSE_INTERNAL_ERROR, CLOSE_UNAUTHORIZED};
use crate::entities::GidAllocator;
use crate::persistence::{PersistenceHandle, PlayerRecord};

/// Subprotocol prefix carrying the bearer token
const BEARER_PREFIX: &str = "Bearer.";

/// Subprotocol echoed back on a successful handshake
const SUBPROTOCOL: &str = "ws";

/// What connection tasks report to the game loop
#[derive(Debug)]
pub enum NetEvent {
    /// Authenticated socket with its loaded character
    Joined {
        gid: u64,
        account_id: i64,
        record: PlayerRecord,
        connection: Connection,
    },
    /// Raw text frame
    Message { gid: u64, text: String },
    Closed { gid: u64 },
}

/// Held by every socket writer task until it has flushed its last frame
#[derive(Debug, Clone)]
pub struct WriterTracker {
    _alive: mpsc::Sender<()>,
}

/// Waits for the writer tasks of a [`WriterTracker`] to finish
#[derive(Debug)]
pub struct WriterSet {
    done: mpsc::Receiver<()>,
}

/// New tracker plus the set that waits on every clone of it
pub fn writer_set() -> (WriterTracker, WriterSet) {
    let (alive, done) = mpsc::channel(1);
    (WriterTracker { _alive: alive }, WriterSet { done })
}

impl WriterSet {
    /// Wait until every tracker clone is dropped, for at most `grace`.
    /// Returns false if writers were still busy when time ran out.
    pub async fn wait(mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.done.recv()).await.is_ok()
    }
}

/// WebSocket listener
pub struct Server {
    listener: TcpListener,
    gids: GidAllocator,
    persistence: PersistenceHandle,
    events: mpsc::UnboundedSender<NetEvent>,
    writers: WriterTracker,
}

impl Server {
    /// Bind the listener
    pub async fn bind(
        addr: &str,
        gids: GidAllocator,
        persistence: PersistenceHandle,
        events: mpsc::UnboundedSender<NetEvent>,
        writers: WriterTracker,
    ) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, gids, persistence, events, writers })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept sockets forever
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);
                    tokio::spawn(handle_client(
                        stream,
                        addr,
                        self.gids.clone(),
                        self.persistence.clone(),
                        self.events.clone(),
                        self.writers.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
}

/// Token from a `Sec-WebSocket-Protocol: ws, Bearer.<token>` header
fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .find_map(|protocol| protocol.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn close_frame(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() }))
}

async fn reject(mut ws: WebSocketStream<TcpStream>, code: u16, reason: &str) {
    if let Err(e) = ws.send(close_frame(code, reason.to_string())).await {
        debug!("Failed to send close frame: {}", e);
    }
    let _ = ws.close(None).await;
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    gids: GidAllocator,
    persistence: PersistenceHandle,
    events: mpsc::UnboundedSender<NetEvent>,
    writers: WriterTracker,
) {
    let mut token = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let Some(found) = bearer_token(request) else {
            let mut error = ErrorResponse::new(Some("missing bearer token".to_string()));
            *error.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(error);
        };
        token = Some(found);
        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let Some(token) = token else {
        return;
    };

    let account_id = match persistence.verify_token(&token).await {
        Ok(Some(account_id)) => account_id,
        Ok(None) => {
            info!("Rejected {}: invalid token", addr);
            reject(ws, CLOSE_UNAUTHORIZED, "invalid token").await;
            return;
        }
        Err(e) => {
            error!("Token check for {} failed: {}", addr, e);
            reject(ws, CLOSE_INTERNAL_ERROR, "authentication unavailable").await;
            return;
        }
    };

    let record = match persistence.load_or_create(account_id).await {
        Ok(record) => record,
        Err(e) => {
            error!("Failed to load character of account {}: {}", account_id, e);
            reject(ws, CLOSE_INTERNAL_ERROR, "failed to load character").await;
            return;
        }
    };

    let gid = gids.next();
    let (mut sink, mut stream) = ws.split();
    let (connection, mut outbound) = Connection::channel();

    // Writer: drains the connection queue into the socket
    tokio::spawn(async move {
        let _tracked = writers;
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Text(text) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason, delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let _ = sink.send(close_frame(code, reason)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    info!("{} authenticated as account {} (gid {})", addr, account_id, gid);
    if events.send(NetEvent::Joined { gid, account_id, record, connection }).is_err() {
        warn!("Game loop is gone, dropping {}", addr);
        return;
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if events.send(NetEvent::Message { gid, text: text.as_str().to_string() }).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Ping / pong frames are answered by tungstenite
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on gid {}: {}", gid, e);
                break;
            }
        }
    }

    debug!("Connection {} (gid {}) closed", addr, gid);
    let _ = events.send(NetEvent::Closed { gid });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::CLOSE_GOING_AWAY;
    use crate::persistence::{self, MemoryStore};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    fn request_with_protocol(protocol: &str) -> Request {
        Request::builder()
            .uri("/")
            .header(SEC_WEBSOCKET_PROTOCOL, protocol)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&request_with_protocol("ws, Bearer.abc")).as_deref(), Some("abc"));
        assert_eq!(bearer_token(&request_with_protocol("Bearer.xyz")).as_deref(), Some("xyz"));
        assert_eq!(bearer_token(&request_with_protocol("ws")), None);
        assert_eq!(bearer_token(&request_with_protocol("Bearer.")), None);
    }

    struct Running {
        addr: SocketAddr,
        events: mpsc::UnboundedReceiver<NetEvent>,
        writers: WriterSet,
        accept: tokio::task::JoinHandle<()>,
    }

    async fn start() -> Running {
        let store = MemoryStore::with_tokens([("good".to_string(), 5)]);
        let (tx, events) = mpsc::unbounded_channel();
        let (tracker, writers) = writer_set();
        let server = Server::bind("127.0.0.1:0", GidAllocator::new(), persistence::spawn(store), tx, tracker)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let accept = tokio::spawn(server.run());
        Running { addr, events, writers, accept }
    }

    fn client_request(addr: SocketAddr, protocol: &str) -> Request {
        let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocol).unwrap());
        request
    }

    #[tokio::test]
    async fn test_valid_token_joins() {
        let Running { addr, mut events, .. } = start().await;
        let (mut ws, _) = connect_async(client_request(addr, "ws, Bearer.good")).await.unwrap();

        let (gid, account_id, record) = match events.recv().await.unwrap() {
            NetEvent::Joined { gid, account_id, record, .. } => (gid, account_id, record),
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(account_id, 5);
        assert_eq!(record.name, "Player1");

        ws.send(Message::text(r#"{"type":"ping","timestamp":1}"#)).await.unwrap();
        match events.recv().await.unwrap() {
            NetEvent::Message { gid: from, text } => {
                assert_eq!(from, gid);
                assert!(text.contains("ping"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        ws.close(None).await.unwrap();
        match events.recv().await.unwrap() {
            NetEvent::Closed { gid: closed } => assert_eq!(closed, gid),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_token_is_closed_with_4001() {
        let Running { addr, .. } = start().await;
        let (mut ws, _) = connect_async(client_request(addr, "ws, Bearer.bad")).await.unwrap();

        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_token_fails_handshake() {
        let Running { addr, .. } = start().await;
        let request = format!("ws://{}/", addr).into_client_request().unwrap();
        assert!(connect_async(request).await.is_err());
    }

    async fn joined_connection(events: &mut mpsc::UnboundedReceiver<NetEvent>) -> Connection {
        match events.recv().await.unwrap() {
            NetEvent::Joined { connection, .. } => connection,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writers_flush_close_frame_before_wait_returns() {
        let Running { addr, mut events, writers, accept } = start().await;
        let (mut ws, _) = connect_async(client_request(addr, "ws, Bearer.good")).await.unwrap();
        let connection = joined_connection(&mut events).await;

        connection.close(CLOSE_GOING_AWAY, "server shutting down", Duration::from_millis(50));
        accept.abort();
        assert!(writers.wait(Duration::from_secs(5)).await);

        match ws.next().await {
            Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), CLOSE_GOING_AWAY),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_on_busy_writer() {
        let Running { addr, mut events, writers, accept } = start().await;
        let (_ws, _) = connect_async(client_request(addr, "ws, Bearer.good")).await.unwrap();
        let connection = joined_connection(&mut events).await;

        connection.close(CLOSE_GOING_AWAY, "server shutting down", Duration::from_secs(30));
        accept.abort();
        assert!(!writers.wait(Duration::from_millis(100)).await);
    }
}
