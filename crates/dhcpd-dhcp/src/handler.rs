use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use dhcpd_conflict::{ConflictDetector, RogueServerDetector};
use dhcpd_core::types::{Lease, PoolCriteria};
use dhcpd_ha::{Fsm, PeerTransport};
use dhcpd_msg::events::Event;
use dhcpd_msg::MessageBus;
use tracing::{debug, info, warn};

use crate::codec::{
    classless_routes_option, ip_list_option, ip_option, message_type_option, relay_agent_info_echo,
    string_option, u32_option, DhcpMessageType, DhcpOption, DhcpPacket, OPT_CLIENT_ID,
    OPT_DNS_SERVER, OPT_DOMAIN_NAME, OPT_MESSAGE, OPT_NTP_SERVERS, OPT_REBINDING_TIME,
    OPT_RENEWAL_TIME, OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK,
};
use crate::lease::{LeaseStore, OfferParams};
use crate::ratelimit::RateLimiter;
use crate::server::lease_to_payload;
use crate::subnet::{select_subnet, Subnet};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

pub struct DoraReply {
    pub packet: DhcpPacket,
    pub destination: SocketAddr,
}

/// The DORA message dispatcher (§4.3). Holds only references to its
/// pluggable collaborators; it owns no durable state itself.
pub struct Handler {
    pub instance_id: String,
    pub server_id: Ipv4Addr,
    pub subnets: Vec<Arc<Subnet>>,
    pub lease_store: Arc<dyn LeaseStore>,
    pub conflict_detector: Option<Arc<dyn ConflictDetector>>,
    pub conflict_max_probes: usize,
    pub rogue_detector: Option<Arc<dyn RogueServerDetector>>,
    pub ha_fsm: Option<Arc<Fsm>>,
    /// Replication sink for confirmed/declined/released leases (§4.6). A
    /// send with no live peer connection fails fast and is swallowed —
    /// replication must never block the DORA path.
    pub ha_transport: Option<Arc<PeerTransport>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub events: Arc<dyn MessageBus>,
}

impl Handler {
    /// Processes one decoded packet received on `receiving_interface` and
    /// returns the reply to send, if any. Returns `None` for drops.
    pub async fn handle(&self, packet: &DhcpPacket, receiving_interface: &str) -> Option<DoraReply> {
        if let Some(fsm) = &self.ha_fsm {
            if !fsm.is_active().await {
                debug!("HA standby, dropping request");
                return None;
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            if !limiter.admit(&packet.mac_address()).await {
                debug!(mac = %packet.mac_address(), "rate limited, dropping request");
                return None;
            }
        }

        let msg_type = packet.message_type()?;
        match msg_type {
            DhcpMessageType::Discover => self.handle_discover(packet, receiving_interface).await,
            DhcpMessageType::Request => self.handle_request(packet, receiving_interface).await,
            DhcpMessageType::Decline => {
                self.handle_decline(packet, receiving_interface).await;
                None
            }
            DhcpMessageType::Release => {
                self.handle_release(packet).await;
                None
            }
            DhcpMessageType::Inform => self.handle_inform(packet, receiving_interface).await,
            DhcpMessageType::Offer | DhcpMessageType::Ack | DhcpMessageType::Nak => None,
        }
    }

    fn mac_and_client_id(packet: &DhcpPacket) -> (String, Option<String>) {
        (packet.mac_address(), packet.client_id())
    }

    /// Echoes option 61 (client identifier) from the request into the
    /// reply per RFC 6842, when the client sent one.
    fn echo_client_id(reply: &mut DhcpPacket, request: &DhcpPacket) {
        if let Some(cid) = request.get_option(OPT_CLIENT_ID) {
            reply.options.push(DhcpOption {
                code: OPT_CLIENT_ID,
                data: cid.to_vec(),
            });
        }
    }

    fn request_criteria(packet: &DhcpPacket) -> PoolCriteria {
        let relay = packet.relay_agent_info();
        PoolCriteria {
            vendor_class: packet.vendor_class(),
            user_class: packet.user_class(),
            circuit_id: relay.as_ref().and_then(|r| r.circuit_id.clone()),
            remote_id: relay.as_ref().and_then(|r| r.remote_id.clone()),
        }
    }

    async fn handle_discover(&self, packet: &DhcpPacket, receiving_interface: &str) -> Option<DoraReply> {
        let subnet = select_subnet(&self.subnets, packet, receiving_interface, Some(self.server_id))?;
        let (mac, client_id) = Self::mac_and_client_id(packet);

        let _ = self
            .events
            .publish(&Event::Discover {
                instance_id: self.instance_id.clone(),
                mac_addr: mac.clone(),
                subnet_cidr: subnet.cidr.to_string(),
                timestamp: Utc::now(),
            })
            .await;

        if let Some(server_id) = packet.server_id() {
            if let Some(rogue) = &self.rogue_detector {
                rogue.record_offer(server_id, packet.xid, &subnet.cidr.to_string()).await;
            }
        }

        let reservation = self
            .lease_store
            .find_reservation(client_id.as_deref(), &mac, &subnet.cidr.to_string())
            .await
            .ok()
            .flatten();

        let (pool_id, ip_addr) = if let Some(reservation) = reservation.as_ref() {
            match reservation.ip.parse::<Ipv4Addr>() {
                Ok(ip) if subnet.contains(ip) => ("reserved".to_string(), ip),
                _ => return self.allocate_for_discover(&subnet, packet, &mac, &client_id).await,
            }
        } else if let Some(existing) = self
            .lease_store
            .find_existing_lease(client_id.as_deref(), &mac)
            .await
            .ok()
            .flatten()
            .filter(|l| l.subnet_cidr == subnet.cidr.to_string())
        {
            (existing.pool_id, existing.ip_addr)
        } else {
            return self.allocate_for_discover(&subnet, packet, &mac, &client_id).await;
        };

        self.build_offer(&subnet, packet, &mac, client_id.as_deref(), pool_id, ip_addr)
            .await
    }

    async fn allocate_for_discover(
        &self,
        subnet: &Arc<Subnet>,
        packet: &DhcpPacket,
        mac: &str,
        client_id: &Option<String>,
    ) -> Option<DoraReply> {
        let criteria = Self::request_criteria(packet);
        let requested_ip = packet.requested_ip().filter(|ip| subnet.contains(*ip));

        let (pool_id, ip_addr) = if let Some(detector) = &self.conflict_detector {
            let (pool_id, candidates) = subnet.allocate_n(&criteria, self.conflict_max_probes).await?;
            let chosen = detector.probe_and_select(&candidates, &subnet.cidr.to_string()).await;
            let chosen = match chosen {
                Some(ip) => ip,
                None => {
                    warn!(subnet = %subnet.cidr, "no conflict-free address available");
                    self.packet_error("handler").await;
                    return None;
                }
            };
            for candidate in &candidates {
                if *candidate != chosen {
                    subnet.release(*candidate).await;
                }
            }
            (pool_id, chosen)
        } else {
            subnet.allocate(&criteria, requested_ip).await?
        };

        self.build_offer(subnet, packet, mac, client_id.as_deref(), pool_id, ip_addr)
            .await
    }

    async fn build_offer(
        &self,
        subnet: &Arc<Subnet>,
        packet: &DhcpPacket,
        mac: &str,
        client_id: Option<&str>,
        pool_id: String,
        ip_addr: Ipv4Addr,
    ) -> Option<DoraReply> {
        let relay = packet.relay_agent_info();
        let lease = self
            .lease_store
            .create_offer(OfferParams {
                ip_addr,
                mac_addr: mac,
                client_id,
                hostname: packet.hostname().as_deref(),
                subnet_cidr: &subnet.cidr.to_string(),
                pool_id: &pool_id,
                lease_time: subnet.lease_time,
                relay: relay.clone(),
            })
            .await;
        let lease = match lease {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "failed to create offer");
                self.packet_error("handler").await;
                return None;
            }
        };

        let _ = self
            .events
            .publish(&Event::Offer {
                instance_id: self.instance_id.clone(),
                ip_addr: lease.ip_addr.to_string(),
                mac_addr: mac.to_string(),
                pool_id: lease.pool_id.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let mut reply = self.base_reply(packet, DhcpMessageType::Offer);
        reply.yiaddr = ip_addr;
        reply.options.extend(self.subnet_options(subnet, true));
        if let Some(relay) = relay {
            reply.options.push(relay_agent_info_echo(&relay));
        }
        Self::echo_client_id(&mut reply, packet);
        self.finalize(reply, packet)
    }

    async fn handle_request(&self, packet: &DhcpPacket, receiving_interface: &str) -> Option<DoraReply> {
        if let Some(server_id) = packet.server_id() {
            if server_id != self.server_id {
                debug!(%server_id, "REQUEST addressed to another server, dropping");
                return None;
            }
        }

        let (mac, client_id) = Self::mac_and_client_id(packet);
        let target_ip = packet.requested_ip().or({
            if packet.ciaddr != Ipv4Addr::UNSPECIFIED {
                Some(packet.ciaddr)
            } else {
                None
            }
        });

        let target_ip = match target_ip {
            Some(ip) => ip,
            None => return self.nak(packet, "missing requested address").await,
        };

        let subnet = match select_subnet(&self.subnets, packet, receiving_interface, Some(self.server_id)) {
            Some(s) => s,
            None => return self.nak(packet, "no matching subnet").await,
        };

        if !subnet.contains(target_ip) {
            return self.nak(packet, "requested address outside subnet").await;
        }

        if let Some(existing) = self
            .lease_store
            .find_existing_lease(client_id.as_deref(), &mac)
            .await
            .ok()
            .flatten()
        {
            if existing.ip_addr != target_ip {
                warn!(existing = %existing.ip_addr, requested = %target_ip, "client requested a different address than its existing lease");
            }
        }

        let lease = match self
            .lease_store
            .confirm_lease(target_ip, &mac, subnet.lease_time)
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "failed to confirm lease");
                return self.nak(packet, "unable to confirm lease").await;
            }
        };

        if let Some(detector) = &self.conflict_detector {
            detector.send_gratuitous_arp(&mac, target_ip).await;
        }

        self.replicate_lease(&lease).await;

        let _ = self
            .events
            .publish(&Event::Ack {
                instance_id: self.instance_id.clone(),
                ip_addr: lease.ip_addr.to_string(),
                mac_addr: mac.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let mut reply = self.base_reply(packet, DhcpMessageType::Ack);
        reply.yiaddr = target_ip;
        if packet.ciaddr != Ipv4Addr::UNSPECIFIED {
            reply.ciaddr = packet.ciaddr;
        }
        reply.options.extend(self.subnet_options(&subnet, true));
        if let Some(relay) = packet.relay_agent_info() {
            reply.options.push(relay_agent_info_echo(&relay));
        }
        Self::echo_client_id(&mut reply, packet);
        self.finalize(reply, packet)
    }

    async fn handle_decline(&self, packet: &DhcpPacket, receiving_interface: &str) {
        let Some(ip) = packet.requested_ip() else {
            return;
        };
        let mac = packet.mac_address();
        let subnet = select_subnet(&self.subnets, packet, receiving_interface, Some(self.server_id));

        let _ = self.lease_store.decline(ip, &mac).await;
        if let (Some(detector), Some(subnet)) = (&self.conflict_detector, subnet.as_ref()) {
            detector.handle_decline(ip, &mac, &subnet.cidr.to_string()).await;
        }
        if let Some(subnet) = subnet {
            subnet.release(ip).await;
        }

        self.replicate_conflict(ip, &mac).await;

        let _ = self
            .events
            .publish(&Event::Decline {
                instance_id: self.instance_id.clone(),
                ip_addr: ip.to_string(),
                mac_addr: mac,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn handle_release(&self, packet: &DhcpPacket) {
        let ip = packet.ciaddr;
        if ip == Ipv4Addr::UNSPECIFIED {
            return;
        }
        let mac = packet.mac_address();
        let _ = self.lease_store.release(ip, &mac).await;
        for subnet in &self.subnets {
            if subnet.contains(ip) {
                subnet.release(ip).await;
                break;
            }
        }

        self.replicate_release(ip, &mac).await;

        let _ = self
            .events
            .publish(&Event::Release {
                instance_id: self.instance_id.clone(),
                ip_addr: ip.to_string(),
                mac_addr: mac,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn handle_inform(&self, packet: &DhcpPacket, receiving_interface: &str) -> Option<DoraReply> {
        let subnet = select_subnet(&self.subnets, packet, receiving_interface, Some(self.server_id))?;
        let mut reply = self.base_reply(packet, DhcpMessageType::Ack);
        reply.yiaddr = Ipv4Addr::UNSPECIFIED;
        reply.ciaddr = packet.ciaddr;
        reply.options.extend(self.subnet_options(&subnet, false));
        if let Some(relay) = packet.relay_agent_info() {
            reply.options.push(relay_agent_info_echo(&relay));
        }
        Self::echo_client_id(&mut reply, packet);
        self.finalize(reply, packet)
    }

    /// Ships a confirmed lease to the HA peer. Best-effort: a send with
    /// no live connection fails, which `PeerTransport::send` reports as
    /// an error we only log — replication never blocks the DORA path.
    async fn replicate_lease(&self, lease: &Lease) {
        if let Some(transport) = &self.ha_transport {
            if let Err(e) = transport.send_lease_update(lease_to_payload(lease)).await {
                debug!(error = %e, "lease replication skipped");
            }
        }
    }

    /// Ships a decline record to the HA peer so its own conflict state
    /// stays in step with ours.
    async fn replicate_conflict(&self, ip: Ipv4Addr, mac: &str) {
        if let Some(transport) = &self.ha_transport {
            let payload = serde_json::json!({ "ip_addr": ip.to_string(), "mac_addr": mac });
            if let Err(e) = transport.send_conflict_update(payload).await {
                debug!(error = %e, "conflict replication skipped");
            }
        }
    }

    /// Ships a release as a lease update with no expiry, the peer tears
    /// its own record down on receipt.
    async fn replicate_release(&self, ip: Ipv4Addr, mac: &str) {
        if let Some(transport) = &self.ha_transport {
            let payload = serde_json::json!({
                "ip_addr": ip.to_string(),
                "mac_addr": mac,
                "state": "released",
            });
            if let Err(e) = transport.send_lease_update(payload).await {
                debug!(error = %e, "release replication skipped");
            }
        }
    }

    /// Publishes a `packet_errors{reason=...}` event (§7). Used for the
    /// transient handler-error class: a collaborator failure encountered
    /// while building a reply, as distinct from a policy drop.
    async fn packet_error(&self, reason: &str) {
        let _ = self
            .events
            .publish(&Event::PacketError {
                instance_id: self.instance_id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn nak(&self, packet: &DhcpPacket, reason: &str) -> Option<DoraReply> {
        info!(reason, "sending NAK");
        let _ = self
            .events
            .publish(&Event::Nak {
                instance_id: self.instance_id.clone(),
                mac_addr: packet.mac_address(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        let mut reply = self.base_reply(packet, DhcpMessageType::Nak);
        reply.options.push(string_option(OPT_MESSAGE, reason));
        Some(DoraReply {
            destination: self.nak_destination(packet),
            packet: reply,
        })
    }

    fn base_reply(&self, request: &DhcpPacket, msg_type: DhcpMessageType) -> DhcpPacket {
        DhcpPacket {
            op: 2, // BOOTREPLY
            htype: request.htype,
            hlen: request.hlen,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: self.server_id,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![message_type_option(msg_type), ip_option(OPT_SERVER_ID, self.server_id)],
        }
    }

    /// Appends an `End` option and wraps the packet with its reply
    /// destination (§4.3 "Reply destination").
    fn finalize(&self, mut reply: DhcpPacket, request: &DhcpPacket) -> Option<DoraReply> {
        reply.options.push(DhcpOption {
            code: crate::codec::OPT_END,
            data: Vec::new(),
        });
        Some(DoraReply {
            destination: self.reply_destination(request),
            packet: reply,
        })
    }

    fn reply_destination(&self, request: &DhcpPacket) -> SocketAddr {
        if request.giaddr != Ipv4Addr::UNSPECIFIED {
            return SocketAddr::new(request.giaddr.into(), DHCP_SERVER_PORT);
        }
        if request.flags & 0x8000 != 0 {
            return SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT);
        }
        if request.ciaddr != Ipv4Addr::UNSPECIFIED {
            return SocketAddr::new(request.ciaddr.into(), DHCP_CLIENT_PORT);
        }
        SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT)
    }

    fn nak_destination(&self, request: &DhcpPacket) -> SocketAddr {
        // NAKs always use the same destination rules as any other reply.
        self.reply_destination(request)
    }

    /// Builds the option-assembly block shared by Offer/Ack/Inform.
    /// `include_lease_timers` is false for Inform replies (§4.3).
    fn subnet_options(&self, subnet: &Subnet, include_lease_timers: bool) -> Vec<DhcpOption> {
        let mut opts = vec![ip_option(OPT_SUBNET_MASK, subnet.mask())];
        if !subnet.routers.is_empty() {
            opts.push(ip_list_option(OPT_ROUTER, &subnet.routers));
        }
        if !subnet.dns_servers.is_empty() {
            opts.push(ip_list_option(OPT_DNS_SERVER, &subnet.dns_servers));
        }
        if !subnet.ntp_servers.is_empty() {
            opts.push(ip_list_option(OPT_NTP_SERVERS, &subnet.ntp_servers));
        }
        if let Some(domain) = &subnet.domain_name {
            opts.push(string_option(OPT_DOMAIN_NAME, domain));
        }
        if include_lease_timers {
            opts.push(u32_option(
                crate::codec::OPT_LEASE_TIME,
                subnet.lease_time.num_seconds() as u32,
            ));
            opts.push(u32_option(OPT_RENEWAL_TIME, subnet.t1.num_seconds() as u32));
            opts.push(u32_option(OPT_REBINDING_TIME, subnet.t2.num_seconds() as u32));
        }
        if !subnet.classless_routes.is_empty() {
            opts.push(classless_routes_option(&subnet.classless_routes));
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::InMemoryLeaseStore;
    use dhcpd_core::config::{PoolConfig, SubnetConfig};
    use dhcpd_msg::noop::NoopMessageBus;

    fn subnet() -> Arc<Subnet> {
        let cfg = SubnetConfig {
            cidr: "10.0.10.0/24".to_string(),
            interface: "eth0".to_string(),
            routers: vec!["10.0.10.1".to_string()],
            dns_servers: vec!["10.0.10.1".to_string()],
            ntp_servers: vec![],
            domain_name: None,
            lease_time_secs: 3600,
            t1_secs: None,
            t2_secs: None,
            classless_routes: vec![],
            pools: vec![PoolConfig {
                id: "default".to_string(),
                range_start: "10.0.10.100".to_string(),
                range_end: "10.0.10.110".to_string(),
                vendor_class: None,
                user_class: None,
                circuit_id: None,
                remote_id: None,
            }],
            reservations: vec![],
        };
        Arc::new(Subnet::from_config(&cfg).unwrap())
    }

    fn discover_packet() -> DhcpPacket {
        let mut chaddr = [0u8; 16];
        chaddr[0..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        DhcpPacket {
            op: 1,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 42,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![message_type_option(DhcpMessageType::Discover)],
        }
    }

    fn handler(subnets: Vec<Arc<Subnet>>) -> Handler {
        Handler {
            instance_id: "test".to_string(),
            server_id: "10.0.10.1".parse().unwrap(),
            subnets,
            lease_store: InMemoryLeaseStore::new(vec![]),
            conflict_detector: None,
            conflict_max_probes: 4,
            rogue_detector: None,
            ha_fsm: None,
            ha_transport: None,
            rate_limiter: None,
            events: Arc::new(NoopMessageBus::new("test")),
        }
    }

    #[tokio::test]
    async fn test_discover_offers_from_pool() {
        let h = handler(vec![subnet()]);
        let reply = h.handle(&discover_packet(), "eth0").await.unwrap();
        assert_eq!(reply.packet.message_type(), Some(DhcpMessageType::Offer));
        assert!(reply.packet.yiaddr >= "10.0.10.100".parse().unwrap());
    }

    #[tokio::test]
    async fn test_request_confirms_offered_lease() {
        let h = handler(vec![subnet()]);
        let offer = h.handle(&discover_packet(), "eth0").await.unwrap();
        let offered_ip = offer.packet.yiaddr;

        let mut request = discover_packet();
        request.options = vec![
            message_type_option(DhcpMessageType::Request),
            ip_option(crate::codec::OPT_REQUESTED_IP, offered_ip),
        ];
        let ack = h.handle(&request, "eth0").await.unwrap();
        assert_eq!(ack.packet.message_type(), Some(DhcpMessageType::Ack));
        assert_eq!(ack.packet.yiaddr, offered_ip);
    }

    #[tokio::test]
    async fn test_request_outside_subnet_is_nak() {
        let h = handler(vec![subnet()]);
        let mut request = discover_packet();
        request.options = vec![
            message_type_option(DhcpMessageType::Request),
            ip_option(crate::codec::OPT_REQUESTED_IP, "192.168.1.5".parse().unwrap()),
        ];
        let nak = h.handle(&request, "eth0").await.unwrap();
        assert_eq!(nak.packet.message_type(), Some(DhcpMessageType::Nak));
    }

    #[tokio::test]
    async fn test_no_matching_subnet_drops_discover() {
        let h = handler(vec![]);
        assert!(h.handle(&discover_packet(), "eth0").await.is_none());
    }

    #[tokio::test]
    async fn test_inform_omits_lease_timers() {
        let h = handler(vec![subnet()]);
        let mut inform = discover_packet();
        inform.ciaddr = "10.0.10.50".parse().unwrap();
        inform.options = vec![message_type_option(DhcpMessageType::Inform)];
        let reply = h.handle(&inform, "eth0").await.unwrap();
        assert_eq!(reply.packet.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(reply.packet.get_option(crate::codec::OPT_LEASE_TIME).is_none());
    }

    #[tokio::test]
    async fn test_offer_echoes_client_id_and_sets_siaddr() {
        let h = handler(vec![subnet()]);
        let mut discover = discover_packet();
        discover.options.push(DhcpOption {
            code: OPT_CLIENT_ID,
            data: vec![1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
        });
        let offer = h.handle(&discover, "eth0").await.unwrap();
        assert_eq!(
            offer.packet.get_option(OPT_CLIENT_ID),
            Some(&[1u8, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff][..])
        );
        assert_eq!(offer.packet.siaddr, h.server_id);
    }

    #[tokio::test]
    async fn test_rate_limited_client_is_dropped() {
        let mut h = handler(vec![subnet()]);
        h.rate_limiter = Some(Arc::new(RateLimiter::new(1000, 0, 60)));
        assert!(h.handle(&discover_packet(), "eth0").await.is_none());
    }
}
