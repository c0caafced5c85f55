use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dhcpd_core::config::ReservationConfig;
use dhcpd_core::error::Result;
use dhcpd_core::types::{Lease, LeaseState, RelayAgentInfo};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Parameters for a freshly offered lease; grouped so `create_offer`
/// doesn't grow an unwieldy positional argument list.
pub struct OfferParams<'a> {
    pub ip_addr: Ipv4Addr,
    pub mac_addr: &'a str,
    pub client_id: Option<&'a str>,
    pub hostname: Option<&'a str>,
    pub subnet_cidr: &'a str,
    pub pool_id: &'a str,
    pub lease_time: Duration,
    pub relay: Option<RelayAgentInfo>,
}

/// Storage contract for DHCP leases and static reservations (§6 C3). The
/// DORA handler only ever talks to this trait — durable persistence,
/// replication to disk, or whatever an operator wants is entirely the
/// implementor's business.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Look up a configured reservation matching this client within the
    /// given subnet. `client_id` takes priority over `mac_addr` when both
    /// are known to the store's backing configuration.
    async fn find_reservation(
        &self,
        client_id: Option<&str>,
        mac_addr: &str,
        subnet_cidr: &str,
    ) -> Result<Option<ReservationConfig>>;

    /// Most recent non-terminal lease for this client, regardless of
    /// which subnet it was issued from.
    async fn find_existing_lease(
        &self,
        client_id: Option<&str>,
        mac_addr: &str,
    ) -> Result<Option<Lease>>;

    async fn create_offer(&self, params: OfferParams<'_>) -> Result<Lease>;

    /// Transition the offered (or previously active) lease for `ip_addr`
    /// to `Active` with a fresh expiry, returning the confirmed lease.
    async fn confirm_lease(&self, ip_addr: Ipv4Addr, mac_addr: &str, lease_time: Duration) -> Result<Lease>;

    async fn decline(&self, ip_addr: Ipv4Addr, mac_addr: &str) -> Result<()>;

    async fn release(&self, ip_addr: Ipv4Addr, mac_addr: &str) -> Result<()>;

    /// Count of leases currently in `Active` state, for diagnostics.
    async fn count(&self) -> Result<usize>;

    /// Monotonically increasing sequence number, unique to this node,
    /// attached to outgoing lease-update replication messages.
    fn next_seq(&self) -> u64;

    async fn list_active(&self) -> Result<Vec<Lease>>;

    /// Purge leases whose state is terminal (`Released`/`Expired`/`Declined`)
    /// and whose expiry is older than `retention`. Returns the purge count.
    async fn purge_expired(&self, retention: Duration) -> Result<usize>;
}

/// In-memory reference `LeaseStore`. Suitable for tests and for operators
/// who don't need leases to survive a restart; production deployments are
/// expected to supply their own durable implementation of the trait.
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<Uuid, Lease>>,
    by_mac: RwLock<HashMap<(String, String), Uuid>>,
    by_ip: RwLock<HashMap<Ipv4Addr, Uuid>>,
    /// Reservations, each tagged with the subnet CIDR it was declared
    /// under, since the same MAC could in principle be reserved on two
    /// different subnets.
    reservations: Vec<(String, ReservationConfig)>,
    seq: AtomicU64,
}

impl InMemoryLeaseStore {
    pub fn new(reservations: Vec<(String, ReservationConfig)>) -> Arc<Self> {
        Arc::new(Self {
            leases: RwLock::new(HashMap::new()),
            by_mac: RwLock::new(HashMap::new()),
            by_ip: RwLock::new(HashMap::new()),
            reservations,
            seq: AtomicU64::new(0),
        })
    }

    async fn index(&self, lease: Lease) {
        let key = (lease.subnet_cidr.clone(), lease.mac_addr.clone());
        let ip = lease.ip_addr;
        let id = lease.id;
        self.leases.write().await.insert(id, lease);
        self.by_mac.write().await.insert(key, id);
        self.by_ip.write().await.insert(ip, id);
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn find_reservation(
        &self,
        client_id: Option<&str>,
        mac_addr: &str,
        subnet_cidr: &str,
    ) -> Result<Option<ReservationConfig>> {
        Ok(self
            .reservations
            .iter()
            .filter(|(cidr, _)| cidr == subnet_cidr)
            .map(|(_, r)| r)
            .find(|r| {
                client_id.is_some() && r.client_id.as_deref() == client_id
                    || r.mac.eq_ignore_ascii_case(mac_addr)
            })
            .cloned())
    }

    async fn find_existing_lease(
        &self,
        _client_id: Option<&str>,
        mac_addr: &str,
    ) -> Result<Option<Lease>> {
        let by_mac = self.by_mac.read().await;
        let id = by_mac
            .iter()
            .find(|((_, mac), _)| mac == mac_addr)
            .map(|(_, id)| *id);
        drop(by_mac);
        match id {
            Some(id) => Ok(self
                .leases
                .read()
                .await
                .get(&id)
                .filter(|l| !matches!(l.state, LeaseState::Released | LeaseState::Declined))
                .cloned()),
            None => Ok(None),
        }
    }

    async fn create_offer(&self, params: OfferParams<'_>) -> Result<Lease> {
        let now = Utc::now();
        let lease = Lease {
            id: Uuid::new_v4(),
            ip_addr: params.ip_addr,
            mac_addr: params.mac_addr.to_string(),
            client_id: params.client_id.map(str::to_string),
            hostname: params.hostname.map(str::to_string),
            subnet_cidr: params.subnet_cidr.to_string(),
            pool_id: params.pool_id.to_string(),
            state: LeaseState::Offered,
            start: now,
            expiry: now + params.lease_time,
            seq: self.next_seq(),
            relay: params.relay,
        };
        self.index(lease.clone()).await;
        Ok(lease)
    }

    async fn confirm_lease(&self, ip_addr: Ipv4Addr, mac_addr: &str, lease_time: Duration) -> Result<Lease> {
        let id = {
            let by_ip = self.by_ip.read().await;
            by_ip.get(&ip_addr).copied()
        };
        let id = match id {
            Some(id) => id,
            None => {
                return Err(dhcpd_core::error::Error::LeaseStore(format!(
                    "no lease exists for {ip_addr}"
                )))
            }
        };
        let mut leases = self.leases.write().await;
        let lease = leases
            .get_mut(&id)
            .ok_or_else(|| dhcpd_core::error::Error::LeaseStore(format!("lease {id} vanished")))?;
        lease.mac_addr = mac_addr.to_string();
        lease.state = LeaseState::Active;
        lease.start = Utc::now();
        lease.expiry = lease.start + lease_time;
        lease.seq = self.next_seq();
        Ok(lease.clone())
    }

    async fn decline(&self, ip_addr: Ipv4Addr, mac_addr: &str) -> Result<()> {
        let _ = mac_addr;
        if let Some(id) = self.by_ip.read().await.get(&ip_addr).copied() {
            if let Some(lease) = self.leases.write().await.get_mut(&id) {
                lease.state = LeaseState::Declined;
                lease.seq = self.next_seq();
            }
        }
        Ok(())
    }

    async fn release(&self, ip_addr: Ipv4Addr, mac_addr: &str) -> Result<()> {
        let _ = mac_addr;
        if let Some(id) = self.by_ip.read().await.get(&ip_addr).copied() {
            if let Some(lease) = self.leases.write().await.get_mut(&id) {
                lease.state = LeaseState::Released;
                lease.seq = self.next_seq();
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .leases
            .read()
            .await
            .values()
            .filter(|l| l.state == LeaseState::Active)
            .count())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn list_active(&self) -> Result<Vec<Lease>> {
        let now = Utc::now();
        Ok(self
            .leases
            .read()
            .await
            .values()
            .filter(|l| l.state == LeaseState::Active && l.expiry > now)
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize> {
        let cutoff = Utc::now() - retention;
        let mut leases = self.leases.write().await;
        let mut by_mac = self.by_mac.write().await;
        let mut by_ip = self.by_ip.write().await;

        let to_remove: Vec<Uuid> = leases
            .values()
            .filter(|l| {
                matches!(
                    l.state,
                    LeaseState::Released | LeaseState::Expired | LeaseState::Declined
                ) && l.expiry < cutoff
            })
            .map(|l| l.id)
            .collect();

        let count = to_remove.len();
        for id in to_remove {
            if let Some(lease) = leases.remove(&id) {
                by_mac.remove(&(lease.subnet_cidr, lease.mac_addr));
                by_ip.remove(&lease.ip_addr);
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(ip: &str, mac: &'static str) -> OfferParams<'static> {
        OfferParams {
            ip_addr: ip.parse().unwrap(),
            mac_addr: mac,
            client_id: None,
            hostname: Some("host1"),
            subnet_cidr: "10.0.10.0/24",
            pool_id: "pool1",
            lease_time: Duration::seconds(3600),
            relay: None,
        }
    }

    #[tokio::test]
    async fn test_offer_then_confirm_then_release() {
        let store = InMemoryLeaseStore::new(vec![]);
        let offered = store.create_offer(params("10.0.10.100", "aa:bb:cc:dd:ee:ff")).await.unwrap();
        assert_eq!(offered.state, LeaseState::Offered);

        let confirmed = store
            .confirm_lease(offered.ip_addr, "aa:bb:cc:dd:ee:ff", Duration::seconds(3600))
            .await
            .unwrap();
        assert_eq!(confirmed.state, LeaseState::Active);
        assert_eq!(store.count().await.unwrap(), 1);

        store.release(confirmed.ip_addr, "aa:bb:cc:dd:ee:ff").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_existing_lease_ignores_terminal_states() {
        let store = InMemoryLeaseStore::new(vec![]);
        let offered = store.create_offer(params("10.0.10.101", "11:22:33:44:55:66")).await.unwrap();
        store.decline(offered.ip_addr, "11:22:33:44:55:66").await.unwrap();
        let found = store
            .find_existing_lease(None, "11:22:33:44:55:66")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_reservation_matches_by_mac() {
        let store = InMemoryLeaseStore::new(vec![(
            "10.0.10.0/24".to_string(),
            ReservationConfig {
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                client_id: None,
                ip: "10.0.10.50".to_string(),
                hostname: None,
            },
        )]);
        let found = store
            .find_reservation(None, "aa:bb:cc:dd:ee:ff", "10.0.10.0/24")
            .await
            .unwrap();
        assert_eq!(found.unwrap().ip, "10.0.10.50");
    }

    #[tokio::test]
    async fn test_next_seq_is_monotonic() {
        let store = InMemoryLeaseStore::new(vec![]);
        let a = store.next_seq();
        let b = store.next_seq();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_purge_expired_respects_retention() {
        let store = InMemoryLeaseStore::new(vec![]);
        let offered = store.create_offer(params("10.0.10.102", "22:33:44:55:66:77")).await.unwrap();
        store.release(offered.ip_addr, "22:33:44:55:66:77").await.unwrap();
        {
            let mut leases = store.leases.write().await;
            for lease in leases.values_mut() {
                lease.expiry = Utc::now() - Duration::days(2);
            }
        }
        let purged = store.purge_expired(Duration::days(1)).await.unwrap();
        assert_eq!(purged, 1);
    }
}
