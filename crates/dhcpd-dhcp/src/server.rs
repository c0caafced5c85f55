use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use dhcpd_core::types::Lease;
use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::codec::DhcpPacket;
use crate::handler::Handler;

const DHCP_SERVER_PORT: u16 = 67;
const RECV_BUFFER_SIZE: usize = 1500;

/// A fixed-size buffer pool for datagram receives; buffers are zeroed
/// before being returned to the pool so no stale packet data can leak
/// into the next receive (§4.4).
struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new((0..capacity).map(|_| vec![0u8; RECV_BUFFER_SIZE]).collect()),
        }
    }

    async fn acquire(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .await
            .pop()
            .unwrap_or_else(|| vec![0u8; RECV_BUFFER_SIZE])
    }

    async fn release(&self, mut buf: Vec<u8>) {
        buf.iter_mut().for_each(|b| *b = 0);
        self.buffers.lock().await.push(buf);
    }
}

struct Listener {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// The UDP listener group (§4.4): one socket per declared subnet
/// interface, each running its own receive loop that hands datagrams off
/// to worker tasks so a slow reservation lookup never stalls the socket.
pub struct ListenerGroup {
    handler: Arc<Handler>,
    listeners: Mutex<HashMap<String, Listener>>,
    buffer_pool: Arc<BufferPool>,
}

impl ListenerGroup {
    pub fn new(handler: Arc<Handler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            listeners: Mutex::new(HashMap::new()),
            buffer_pool: Arc::new(BufferPool::new(64)),
        })
    }

    /// Starts a listener for every interface currently missing one, and
    /// stops listeners for interfaces no longer present. Existing
    /// listeners are left untouched (§4.4 "Reload").
    pub async fn reload(&self, interfaces: &[String]) {
        let mut listeners = self.listeners.lock().await;

        let to_stop: Vec<String> = listeners
            .keys()
            .filter(|iface| !interfaces.contains(iface))
            .cloned()
            .collect();
        for iface in to_stop {
            if let Some(listener) = listeners.remove(&iface) {
                let _ = listener.shutdown.send(true);
                info!(interface = %iface, "stopped DHCP listener");
            }
        }

        for iface in interfaces {
            if listeners.contains_key(iface) {
                continue;
            }
            match self.bind_interface(iface).await {
                Ok(socket) => {
                    let (tx, rx) = watch::channel(false);
                    let task = tokio::spawn(Self::receive_loop(
                        self.handler.clone(),
                        self.buffer_pool.clone(),
                        Arc::new(socket),
                        iface.clone(),
                        rx,
                    ));
                    listeners.insert(iface.clone(), Listener { shutdown: tx, task });
                    info!(interface = %iface, "started DHCP listener");
                }
                Err(e) => error!(interface = %iface, error = %e, "failed to bind DHCP listener"),
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (iface, listener) in listeners.drain() {
            let _ = listener.shutdown.send(true);
            if let Err(e) = listener.task.await {
                warn!(interface = %iface, error = %e, "listener task panicked");
            }
        }
    }

    async fn bind_interface(&self, interface: &str) -> anyhow::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;

        #[cfg(target_os = "linux")]
        {
            if let Err(e) = socket.bind_device(Some(interface.as_bytes())) {
                debug!(interface, error = %e, "bind-to-device unsupported, continuing unpinned");
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            debug!(interface, "bind-to-device not supported on this platform, continuing unpinned");
        }

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        Ok(UdpSocket::from_std(socket.into())?)
    }

    async fn receive_loop(
        handler: Arc<Handler>,
        buffer_pool: Arc<BufferPool>,
        socket: Arc<UdpSocket>,
        interface: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let mut buf = buffer_pool.acquire().await;
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let socket = socket.clone();
                            let handler = handler.clone();
                            let buffer_pool = buffer_pool.clone();
                            let interface = interface.clone();
                            let received = buf[..len].to_vec();
                            tokio::spawn(async move {
                                Self::handle_datagram(handler, socket, &interface, src, received).await;
                            });
                            buffer_pool.release(buf).await;
                        }
                        Err(e) => {
                            warn!(interface = %interface, error = %e, "recv_from failed");
                            buffer_pool.release(buf).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    buffer_pool.release(buf).await;
                    if *shutdown.borrow() {
                        debug!(interface = %interface, "listener shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_datagram(
        handler: Arc<Handler>,
        socket: Arc<UdpSocket>,
        interface: &str,
        _src: SocketAddr,
        data: Vec<u8>,
    ) {
        let packet = match DhcpPacket::parse(&data) {
            Some(p) => p,
            None => {
                debug!(interface, "dropping malformed packet");
                let _ = handler
                    .events
                    .publish(&dhcpd_msg::events::Event::PacketError {
                        instance_id: handler.instance_id.clone(),
                        reason: "decode".to_string(),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                return;
            }
        };

        if let Some(reply) = handler.handle(&packet, interface).await {
            let bytes = reply.packet.to_bytes();
            if let Err(e) = socket.send_to(&bytes, reply.destination).await {
                warn!(interface, destination = %reply.destination, error = %e, "failed to send reply");
            }
        }
    }
}

/// JSON payload shape for HA lease-update replication frames, shared by
/// the handler's replication hook and the peer transport's dispatch
/// callback.
pub fn lease_to_payload(lease: &Lease) -> serde_json::Value {
    json!({
        "id": lease.id,
        "ip_addr": lease.ip_addr,
        "mac_addr": lease.mac_addr,
        "client_id": lease.client_id,
        "hostname": lease.hostname,
        "subnet_cidr": lease.subnet_cidr,
        "pool_id": lease.pool_id,
        "state": lease.state,
        "start": lease.start,
        "expiry": lease.expiry,
        "seq": lease.seq,
    })
}
