use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::probe::ProbeTransport;
use crate::state::{ConflictMethod, ConflictRecord, ConflictState};

/// The conflict-detector capability the DORA handler consumes (§6 C4).
/// `probe_and_select` is called with `allocate_n`'s candidates during
/// Discover when probing is enabled; `handle_decline` is called for every
/// DHCPDECLINE.
#[async_trait::async_trait]
pub trait ConflictDetector: Send + Sync {
    async fn probe_and_select(
        &self,
        candidates: &[Ipv4Addr],
        subnet_cidr: &str,
    ) -> Option<Ipv4Addr>;

    async fn send_gratuitous_arp(&self, mac: &str, ip: Ipv4Addr);

    async fn handle_decline(&self, ip: Ipv4Addr, mac: &str, subnet_cidr: &str);
}

/// Reference `ConflictDetector`: probes candidates with a pluggable
/// [`ProbeTransport`] and keeps an in-memory [`ConflictState`] so declines
/// and probe hits can be bulk-synced to an HA peer.
pub struct InMemoryConflictDetector {
    transport: Arc<dyn ProbeTransport>,
    probe_timeout: Duration,
    state: Mutex<ConflictState>,
}

impl InMemoryConflictDetector {
    pub fn new(transport: Arc<dyn ProbeTransport>, probe_timeout: Duration) -> Self {
        Self {
            transport,
            probe_timeout,
            state: Mutex::new(ConflictState::new()),
        }
    }

    pub async fn snapshot(&self) -> Vec<ConflictRecord> {
        self.state.lock().await.all()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ConflictDetector for InMemoryConflictDetector {
    async fn probe_and_select(
        &self,
        candidates: &[Ipv4Addr],
        subnet_cidr: &str,
    ) -> Option<Ipv4Addr> {
        for &candidate in candidates {
            if self
                .transport
                .is_in_use(candidate.into(), self.probe_timeout)
                .await
            {
                debug!(%candidate, "probe detected address in use, recording conflict");
                self.state.lock().await.record(ConflictRecord {
                    ip: candidate,
                    mac_addr: None,
                    subnet_cidr: subnet_cidr.to_string(),
                    method: ConflictMethod::Probe,
                    recorded_at: Utc::now(),
                });
                continue;
            }
            return Some(candidate);
        }
        warn!(subnet = subnet_cidr, "all probe candidates appear in use");
        None
    }

    async fn send_gratuitous_arp(&self, mac: &str, ip: Ipv4Addr) {
        self.transport.send_gratuitous_arp(mac, ip.into()).await;
    }

    async fn handle_decline(&self, ip: Ipv4Addr, mac: &str, subnet_cidr: &str) {
        self.state.lock().await.record(ConflictRecord {
            ip,
            mac_addr: Some(mac.to_string()),
            subnet_cidr: subnet_cidr.to_string(),
            method: ConflictMethod::ClientDecline,
            recorded_at: Utc::now(),
        });
    }
}
