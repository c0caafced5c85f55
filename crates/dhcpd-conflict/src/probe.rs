use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// The on-host ARP/ICMP probe transport is an abstract capability (§6,
/// non-goal): this repository does not open raw sockets. `ProbeTransport`
/// is the seam a production deployment plugs a real ARP prober behind;
/// [`TcpReachabilityProbe`] is the reference implementation used by tests
/// and standalone operation, following the donor's `ping_probe` fallback
/// of treating a TCP connect (or a refused connection, which still proves
/// the host is up) as a reachability signal.
#[async_trait::async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Returns true if `target` appears to be in use by some other host.
    async fn is_in_use(&self, target: IpAddr, timeout: Duration) -> bool;

    /// Best-effort gratuitous ARP announcement. Failure is logged and
    /// swallowed per the open-question resolution in DESIGN.md — it must
    /// never surface to the client.
    async fn send_gratuitous_arp(&self, mac: &str, ip: IpAddr);
}

#[derive(Debug, Clone, Default)]
pub struct TcpReachabilityProbe;

#[async_trait::async_trait]
impl ProbeTransport for TcpReachabilityProbe {
    async fn is_in_use(&self, target: IpAddr, timeout: Duration) -> bool {
        for port in [80u16, 443] {
            let addr = SocketAddr::new(target, port);
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => return true,
                _ => continue,
            }
        }
        false
    }

    async fn send_gratuitous_arp(&self, mac: &str, ip: IpAddr) {
        // No raw-socket ARP transport in this repository (§6 non-goal);
        // a real deployment plugs a `ProbeTransport` impl with one in.
        debug!(mac, %ip, "gratuitous ARP requested (no-op probe transport)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_address_is_free() {
        let probe = TcpReachabilityProbe;
        // TEST-NET-1 address, nothing listens here in CI.
        let in_use = probe
            .is_in_use("192.0.2.1".parse().unwrap(), Duration::from_millis(200))
            .await;
        assert!(!in_use);
    }
}
