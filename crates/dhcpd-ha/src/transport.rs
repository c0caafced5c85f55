use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::fsm::Fsm;

/// Largest frame this side will accept from a peer (§4.6).
const MAX_FRAME_BYTES: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaMessageType {
    Heartbeat,
    LeaseUpdate,
    BulkStart,
    BulkData,
    BulkEnd,
    FailoverClaim,
    FailoverAck,
    StateRequest,
    ConflictUpdate,
    ConflictBulk,
    ConfigSync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaMessage {
    #[serde(rename = "type")]
    pub msg_type: HaMessageType,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl HaMessage {
    pub fn new(msg_type: HaMessageType, payload: serde_json::Value) -> Self {
        Self {
            msg_type,
            timestamp: Utc::now().timestamp(),
            payload,
        }
    }
}

/// Callbacks invoked as inbound peer messages are dispatched. The DHCP
/// and conflict crates wire these to their own stores; the transport
/// itself holds no DHCP-domain state.
pub struct PeerCallbacks {
    pub on_lease_update: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    pub on_bulk_lease: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    pub on_conflict_update: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    pub on_config_sync: Box<dyn Fn(serde_json::Value) + Send + Sync>,
    /// Fired once an adjacency (inbound or outbound) is established (§4.6).
    /// The primary's binary wires this to push its full config section to
    /// a freshly (re)connected secondary via `send_config_sync`.
    pub on_adjacency_formed: Box<dyn Fn(Arc<PeerTransport>) + Send + Sync>,
}

impl Default for PeerCallbacks {
    fn default() -> Self {
        Self {
            on_lease_update: Box::new(|_| {}),
            on_bulk_lease: Box::new(|_| {}),
            on_conflict_update: Box::new(|_| {}),
            on_config_sync: Box::new(|_| {}),
            on_adjacency_formed: Box::new(|_| {}),
        }
    }
}

/// The peer transport (§4.6). Maintains a single live TCP connection to
/// the HA partner, either by accepting (any role) or dialing (secondary
/// dials primary, matching the donor's leaf-to-coordinator convention).
/// Only one connection is ever "hot" at a time: a fresh inbound or
/// outbound connection simply replaces whatever sender is currently
/// registered, and the old connection's writer task exits the next time
/// its channel send fails.
pub struct PeerTransport {
    bind_addr: String,
    peer_addr: Option<String>,
    heartbeat_interval: Duration,
    fsm: Arc<Fsm>,
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    epoch: AtomicU64,
    callbacks: Arc<PeerCallbacks>,
}

impl PeerTransport {
    pub fn new(
        bind_addr: impl Into<String>,
        peer_addr: Option<String>,
        heartbeat_interval: Duration,
        fsm: Arc<Fsm>,
        callbacks: PeerCallbacks,
    ) -> Arc<Self> {
        Arc::new(Self {
            bind_addr: bind_addr.into(),
            peer_addr,
            heartbeat_interval,
            fsm,
            sender: Mutex::new(None),
            epoch: AtomicU64::new(0),
            callbacks: Arc::new(callbacks),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    /// Best-effort send; returns an error if there is currently no live
    /// connection rather than buffering or blocking the caller.
    pub async fn send(&self, message: &HaMessage) -> anyhow::Result<()> {
        let body = serde_json::to_vec(message)?;
        if body.len() as u64 > MAX_FRAME_BYTES as u64 {
            anyhow::bail!("HA frame too large: {} bytes", body.len());
        }
        let sender = self.sender.lock().await.clone();
        match sender {
            Some(tx) => tx
                .send(body)
                .await
                .map_err(|_| anyhow::anyhow!("HA peer connection closed")),
            None => anyhow::bail!("no live HA peer connection"),
        }
    }

    pub async fn send_failover_claim(&self) -> anyhow::Result<()> {
        self.send(&HaMessage::new(HaMessageType::FailoverClaim, serde_json::Value::Null))
            .await
    }

    pub async fn send_lease_update(&self, lease: serde_json::Value) -> anyhow::Result<()> {
        self.send(&HaMessage::new(HaMessageType::LeaseUpdate, lease)).await
    }

    pub async fn send_conflict_update(&self, record: serde_json::Value) -> anyhow::Result<()> {
        self.send(&HaMessage::new(HaMessageType::ConflictUpdate, record))
            .await
    }

    pub async fn send_config_sync(&self, config: serde_json::Value) -> anyhow::Result<()> {
        self.send(&HaMessage::new(HaMessageType::ConfigSync, config)).await
    }

    /// Runs the accept loop (every role listens), the heartbeat sender,
    /// and (for a node configured with a peer address) the dial loop,
    /// until `shutdown` fires. This is the entry point the binary spawns.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HA peer transport listening");

        let accept_task = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, peer)) => {
                                    debug!(%peer, "accepted HA peer connection");
                                    this.clone().spawn_connection(stream);
                                }
                                Err(e) => warn!(error = %e, "HA accept failed"),
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let heartbeat_task = {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.heartbeat_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let msg = HaMessage::new(HaMessageType::Heartbeat, serde_json::Value::Null);
                            let _ = this.send(&msg).await;
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let dial_task = if let Some(peer_addr) = self.peer_addr.clone() {
            let this = self.clone();
            let mut shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                let mut backoff = Duration::from_secs(1);
                loop {
                    if this.is_connected().await {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() { break; }
                            }
                        }
                        continue;
                    }
                    match TcpStream::connect(&peer_addr).await {
                        Ok(stream) => {
                            debug!(addr = %peer_addr, "dialed HA peer");
                            backoff = Duration::from_secs(1);
                            this.clone().spawn_connection(stream);
                        }
                        Err(e) => {
                            warn!(addr = %peer_addr, error = %e, "HA dial failed, retrying");
                        }
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                    }
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(30));
                }
            }))
        } else {
            None
        };

        let _ = accept_task.await;
        let _ = heartbeat_task.await;
        if let Some(task) = dial_task {
            let _ = task.await;
        }
        Ok(())
    }

    fn spawn_connection(self: Arc<Self>, stream: TcpStream) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let this = self.clone();
        tokio::spawn(async move {
            *this.sender.lock().await = Some(tx);
            (this.callbacks.on_adjacency_formed)(this.clone());
        });
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(Self::writer_loop(write_half, rx));
        tokio::spawn(self.reader_loop(read_half, epoch));
    }

    async fn writer_loop(
        mut write_half: tokio::net::tcp::OwnedWriteHalf,
        mut rx: mpsc::Receiver<Vec<u8>>,
    ) {
        while let Some(body) = rx.recv().await {
            let len = body.len() as u32;
            let write_result = tokio::time::timeout(Duration::from_secs(5), async {
                write_half.write_all(&len.to_be_bytes()).await?;
                write_half.write_all(&body).await
            })
            .await;
            match write_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "HA write failed, closing connection");
                    break;
                }
                Err(_) => {
                    warn!("HA write deadline exceeded, closing connection");
                    break;
                }
            }
        }
    }

    async fn reader_loop(
        self: Arc<Self>,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        epoch: u64,
    ) {
        let read_deadline = self.heartbeat_interval * 3;
        loop {
            let mut len_buf = [0u8; 4];
            let read_result = tokio::time::timeout(read_deadline, read_half.read_exact(&mut len_buf)).await;
            let len = match read_result {
                Ok(Ok(())) => u32::from_be_bytes(len_buf),
                _ => {
                    debug!("HA peer connection read closed or timed out");
                    break;
                }
            };
            if len > MAX_FRAME_BYTES {
                warn!(len, "HA peer sent oversized frame, dropping connection");
                break;
            }
            let mut body = vec![0u8; len as usize];
            if tokio::time::timeout(read_deadline, read_half.read_exact(&mut body))
                .await
                .is_err()
            {
                warn!("HA peer body read timed out");
                break;
            }
            match serde_json::from_slice::<HaMessage>(&body) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => warn!(error = %e, "malformed HA frame"),
            }
        }
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *self.sender.lock().await = None;
        }
    }

    async fn dispatch(&self, message: HaMessage) {
        match message.msg_type {
            HaMessageType::Heartbeat => self.fsm.handle_peer_up().await,
            HaMessageType::LeaseUpdate => (self.callbacks.on_lease_update)(message.payload),
            HaMessageType::BulkStart => {}
            HaMessageType::BulkData => (self.callbacks.on_bulk_lease)(message.payload),
            HaMessageType::BulkEnd => self.fsm.handle_bulk_sync_complete().await,
            HaMessageType::FailoverClaim => self.fsm.handle_peer_claim().await,
            HaMessageType::FailoverAck => {}
            HaMessageType::StateRequest => {}
            HaMessageType::ConflictUpdate | HaMessageType::ConflictBulk => {
                (self.callbacks.on_conflict_update)(message.payload)
            }
            HaMessageType::ConfigSync => (self.callbacks.on_config_sync)(message.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Fsm;
    use dhcpd_core::types::HaRole;
    use dhcpd_msg::noop::NoopMessageBus;
    use std::net::Ipv4Addr;

    fn fsm() -> Arc<Fsm> {
        Fsm::new(
            "t1",
            HaRole::Primary,
            Duration::from_secs(10),
            Arc::new(NoopMessageBus::new("t1")),
        )
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = HaMessage::new(
            HaMessageType::LeaseUpdate,
            serde_json::json!({ "ip": Ipv4Addr::new(10, 0, 0, 5).to_string() }),
        );
        let bytes = serde_json::to_vec(&msg).unwrap();
        let parsed: HaMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.msg_type, HaMessageType::LeaseUpdate);
    }

    #[tokio::test]
    async fn test_send_without_connection_errors() {
        let transport = PeerTransport::new(
            "127.0.0.1:0",
            None,
            Duration::from_secs(1),
            fsm(),
            PeerCallbacks::default(),
        );
        let result = transport
            .send(&HaMessage::new(HaMessageType::Heartbeat, serde_json::Value::Null))
            .await;
        assert!(result.is_err());
    }
}
