use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Duration;
use dhcpd_core::config::SubnetConfig;
use dhcpd_core::error::{Error, Result};
use dhcpd_core::types::PoolCriteria;
use ipnet::Ipv4Net;
use tokio::sync::RwLock;

use crate::codec::{ClasslessRoute, DhcpPacket};
use crate::pool::{select_pool, Ipv4Pool};

/// Runtime, parsed form of a configured subnet: address ranges and option
/// defaults are resolved to concrete types once at load time so the DORA
/// handler never re-parses strings on the hot path.
pub struct Subnet {
    pub cidr: Ipv4Net,
    pub interface: String,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_time: Duration,
    pub t1: Duration,
    pub t2: Duration,
    pub classless_routes: Vec<ClasslessRoute>,
    /// Read-mostly: mutated only on allocation/release/reload, so readers
    /// (e.g. a stats endpoint) never block behind one allocation.
    pub pools: RwLock<Vec<Ipv4Pool>>,
}

impl Subnet {
    pub fn from_config(cfg: &SubnetConfig) -> Result<Self> {
        let cidr: Ipv4Net = cfg
            .cidr
            .parse()
            .map_err(|_| Error::InvalidSubnet(cfg.cidr.clone()))?;

        let parse_ips = |addrs: &[String]| -> Result<Vec<Ipv4Addr>> {
            addrs
                .iter()
                .map(|s| s.parse().map_err(|_| Error::InvalidSubnet(s.clone())))
                .collect()
        };

        let lease_time = Duration::seconds(cfg.lease_time_secs as i64);
        let t1 = cfg
            .t1_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(lease_time / 2);
        let t2 = cfg
            .t2_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or(lease_time * 7 / 8);

        let classless_routes = cfg
            .classless_routes
            .iter()
            .map(|r| {
                Ok(ClasslessRoute {
                    destination: r
                        .destination
                        .parse()
                        .map_err(|_| Error::InvalidSubnet(r.destination.clone()))?,
                    gateway: r
                        .gateway
                        .parse()
                        .map_err(|_| Error::InvalidSubnet(r.gateway.clone()))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pools = Vec::with_capacity(cfg.pools.len());
        for pool_cfg in &cfg.pools {
            let range_start: Ipv4Addr = pool_cfg
                .range_start
                .parse()
                .map_err(|_| Error::InvalidSubnet(pool_cfg.range_start.clone()))?;
            let range_end: Ipv4Addr = pool_cfg
                .range_end
                .parse()
                .map_err(|_| Error::InvalidSubnet(pool_cfg.range_end.clone()))?;
            let criteria = PoolCriteria {
                vendor_class: pool_cfg.vendor_class.clone(),
                user_class: pool_cfg.user_class.clone(),
                circuit_id: pool_cfg.circuit_id.clone(),
                remote_id: pool_cfg.remote_id.clone(),
            };
            pools.push(Ipv4Pool::new(pool_cfg.id.clone(), range_start, range_end).with_criteria(criteria));
        }

        Ok(Self {
            cidr,
            interface: cfg.interface.clone(),
            routers: parse_ips(&cfg.routers)?,
            dns_servers: parse_ips(&cfg.dns_servers)?,
            ntp_servers: parse_ips(&cfg.ntp_servers)?,
            domain_name: cfg.domain_name.clone(),
            lease_time,
            t1,
            t2,
            classless_routes,
            pools: RwLock::new(pools),
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.cidr.contains(&ip)
    }

    pub fn prefix_len(&self) -> u8 {
        self.cidr.prefix_len()
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.cidr.netmask()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.cidr.broadcast()
    }

    /// Select a pool by criteria and allocate one address from it,
    /// preferring `requested_ip` when it's free and inside the pool.
    pub async fn allocate(
        &self,
        criteria: &PoolCriteria,
        requested_ip: Option<Ipv4Addr>,
    ) -> Option<(String, Ipv4Addr)> {
        let mut pools = self.pools.write().await;
        let pool = select_pool(&mut pools, criteria)?;
        if let Some(ip) = requested_ip {
            if pool.contains(ip) && !pool.is_allocated(&ip) && pool.allocate_specific(ip) {
                return Some((pool.id.clone(), ip));
            }
        }
        pool.allocate().map(|ip| (pool.id.clone(), ip))
    }

    /// Select a pool by criteria and allocate up to `n` candidates from it,
    /// for conflict-probing callers that need several addresses to try.
    pub async fn allocate_n(&self, criteria: &PoolCriteria, n: usize) -> Option<(String, Vec<Ipv4Addr>)> {
        let mut pools = self.pools.write().await;
        let pool = select_pool(&mut pools, criteria)?;
        let candidates = pool.allocate_n(n);
        if candidates.is_empty() {
            return None;
        }
        Some((pool.id.clone(), candidates))
    }

    pub async fn release(&self, ip: Ipv4Addr) {
        let mut pools = self.pools.write().await;
        for pool in pools.iter_mut() {
            if pool.contains(ip) {
                pool.release(&ip);
            }
        }
    }
}

/// Resolve which configured subnet a request belongs to (§4.3). First
/// match wins.
pub fn select_subnet(
    subnets: &[Arc<Subnet>],
    packet: &DhcpPacket,
    receiving_interface: &str,
    configured_server_ip: Option<Ipv4Addr>,
) -> Option<Arc<Subnet>> {
    let by_ip = |ip: Ipv4Addr| subnets.iter().find(|s| s.contains(ip)).cloned();

    if let Some(ip) = packet.subnet_selection() {
        if let Some(subnet) = by_ip(ip) {
            return Some(subnet);
        }
    }

    if let Some(relay) = packet.relay_agent_info() {
        if let Some(link) = relay.link_selection {
            if let Some(subnet) = by_ip(link) {
                return Some(subnet);
            }
        }
    }

    if packet.giaddr != Ipv4Addr::UNSPECIFIED {
        if let Some(subnet) = by_ip(packet.giaddr) {
            return Some(subnet);
        }
    }

    if packet.ciaddr != Ipv4Addr::UNSPECIFIED {
        if let Some(subnet) = by_ip(packet.ciaddr) {
            return Some(subnet);
        }
    }

    if let Some(subnet) = subnets.iter().find(|s| s.interface == receiving_interface) {
        return Some(subnet.clone());
    }

    if let Some(ip) = configured_server_ip {
        if let Some(subnet) = by_ip(ip) {
            return Some(subnet);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SubnetConfig {
        SubnetConfig {
            cidr: "10.0.10.0/24".to_string(),
            interface: "eth0".to_string(),
            routers: vec!["10.0.10.1".to_string()],
            dns_servers: vec!["10.0.10.1".to_string()],
            ntp_servers: vec![],
            domain_name: Some("example.test".to_string()),
            lease_time_secs: 3600,
            t1_secs: None,
            t2_secs: None,
            classless_routes: vec![],
            pools: vec![dhcpd_core::config::PoolConfig {
                id: "default".to_string(),
                range_start: "10.0.10.100".to_string(),
                range_end: "10.0.10.110".to_string(),
                vendor_class: None,
                user_class: None,
                circuit_id: None,
                remote_id: None,
            }],
            reservations: vec![],
        }
    }

    #[test]
    fn test_from_config_derives_t1_t2() {
        let subnet = Subnet::from_config(&cfg()).unwrap();
        assert_eq!(subnet.t1, Duration::seconds(1800));
        assert_eq!(subnet.t2, Duration::seconds(3150));
        assert_eq!(subnet.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(10, 0, 10, 255));
    }

    #[tokio::test]
    async fn test_allocate_prefers_requested_ip() {
        let subnet = Subnet::from_config(&cfg()).unwrap();
        let (pool_id, ip) = subnet
            .allocate(&PoolCriteria::default(), Some("10.0.10.105".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(pool_id, "default");
        assert_eq!(ip, "10.0.10.105".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_select_subnet_falls_back_to_interface() {
        let subnet = Arc::new(Subnet::from_config(&cfg()).unwrap());
        let subnets = vec![subnet];
        let packet = crate::codec::DhcpPacket {
            op: 1,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 1,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; 16],
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![],
        };
        let resolved = select_subnet(&subnets, &packet, "eth0", None).unwrap();
        assert_eq!(resolved.interface, "eth0");
    }
}
