use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use forge_core::{ServerFrame, UserId};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Client identifier, chosen by the client in the connection URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket client. The user binding is fixed at connect
/// time by token verification.
pub struct Client {
    pub id: ClientId,
    pub user_id: Option<UserId>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, user_id: Option<UserId>, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients, keyed by client id.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a client under its chosen id. A reconnect with the same
    /// id replaces the stale entry.
    pub fn register(
        &self,
        id: ClientId,
        user_id: Option<UserId>,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), user_id, tx));
        if let Some(old) = self.clients.insert(id, client) {
            old.connected.store(false, Ordering::Relaxed);
        }
        rx
    }

    /// Remove a client. Safe to call for ids that are already gone.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_registered(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// The user bound to a connection, if the client authenticated.
    pub fn user_id_of(&self, id: &ClientId) -> Option<UserId> {
        self.clients.get(id).and_then(|c| c.user_id.clone())
    }

    /// Serialize a frame and queue it for one client. A closed channel
    /// means the socket is gone, so the entry is dropped on the spot.
    pub fn send(&self, client_id: &ClientId, frame: &ServerFrame) -> bool {
        let Ok(json) = serde_json::to_string(frame) else {
            return false;
        };
        let Some(client) = self.clients.get(client_id).map(|c| Arc::clone(&c)) else {
            return false;
        };
        match client.tx.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %client_id,
                    frame = frame.frame_type(),
                    msg_len = msg.len(),
                    "Send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(client_id);
                false
            }
        }
    }

    /// Queue a frame for every connected client. Clients whose channel
    /// is closed are unregistered along the way. Returns the number of
    /// clients the frame was queued for.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        let Ok(json) = serde_json::to_string(frame) else {
            return 0;
        };
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().tx.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        client_id = %entry.key(),
                        frame = frame.frame_type(),
                        "Send queue full, dropping broadcast frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(entry.key().clone());
                }
            }
        }
        // Removing during iteration would deadlock on the shard lock.
        for id in dead {
            self.unregister(&id);
        }
        delivered
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    fn record_pong(&self, id: &ClientId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Remove clients that haven't answered pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(client_id = %id, "Cleaned up dead client");
        }
        removed
    }
}

/// Run a WebSocket connection: writer forwards queued frames plus
/// heartbeat pings, reader feeds inbound text to the gateway channel.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    reader_registry.record_pong(&reader_cid);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pings itself
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Background task that periodically sweeps dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "Dead client cleanup");
            }
        }
    })
}
