use std::collections::HashMap;
use std::net::Ipv4Addr;

use tokio::sync::Mutex;

/// Rogue-server detector capability (§6 C10, contract only). The DORA
/// handler never consults this directly — it records OFFERs it observes
/// from other servers (e.g. via a passive sniff the deployment wires up
/// out-of-band) and lets an operator query which server identifiers look
/// untrusted. The active-probe half is deliberately left unimplemented:
/// distinguishing a legitimate secondary DHCP server from a rogue one
/// needs deployment-specific policy this repository doesn't own.
#[async_trait::async_trait]
pub trait RogueServerDetector: Send + Sync {
    async fn record_offer(&self, server_id: Ipv4Addr, xid: u32, subnet_cidr: &str);
    async fn is_known_rogue(&self, server_id: Ipv4Addr) -> bool;
}

#[derive(Default)]
struct ObservedServer {
    offer_count: u64,
    subnets: Vec<String>,
}

/// In-memory reference detector: a server identifier is flagged rogue once
/// it has been observed offering into more than one subnet this node also
/// serves, which is the simplest signal that doesn't need operator input.
pub struct InMemoryRogueDetector {
    known_self: Vec<Ipv4Addr>,
    observed: Mutex<HashMap<Ipv4Addr, ObservedServer>>,
}

impl InMemoryRogueDetector {
    pub fn new(known_self: Vec<Ipv4Addr>) -> Self {
        Self {
            known_self,
            observed: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl RogueServerDetector for InMemoryRogueDetector {
    async fn record_offer(&self, server_id: Ipv4Addr, xid: u32, subnet_cidr: &str) {
        if self.known_self.contains(&server_id) {
            return;
        }
        let _ = xid;
        let mut observed = self.observed.lock().await;
        let entry = observed.entry(server_id).or_default();
        entry.offer_count += 1;
        if !entry.subnets.iter().any(|s| s == subnet_cidr) {
            entry.subnets.push(subnet_cidr.to_string());
        }
    }

    async fn is_known_rogue(&self, server_id: Ipv4Addr) -> bool {
        self.observed
            .lock()
            .await
            .get(&server_id)
            .map(|entry| entry.subnets.len() > 1)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_self_offers_are_ignored() {
        let detector = InMemoryRogueDetector::new(vec!["10.0.0.1".parse().unwrap()]);
        detector
            .record_offer("10.0.0.1".parse().unwrap(), 1, "10.0.0.0/24")
            .await;
        assert!(!detector.is_known_rogue("10.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_multi_subnet_offers_flag_rogue() {
        let detector = InMemoryRogueDetector::new(vec![]);
        let other = "10.0.0.99".parse().unwrap();
        detector.record_offer(other, 1, "10.0.0.0/24").await;
        assert!(!detector.is_known_rogue(other).await);
        detector.record_offer(other, 2, "10.0.1.0/24").await;
        assert!(detector.is_known_rogue(other).await);
    }
}
