use std::collections::HashSet;
use std::net::Ipv4Addr;

use dhcpd_core::types::PoolCriteria;

/// Manages a pool of IPv4 addresses for DHCP allocation.
///
/// `cursor` remembers where the last scan left off so repeated allocation
/// doesn't re-walk addresses at the front of the range that are still in
/// use; it wraps once the range is exhausted.
pub struct Ipv4Pool {
    pub id: String,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub criteria: PoolCriteria,
    allocated: HashSet<Ipv4Addr>,
    cursor: u32,
}

impl Ipv4Pool {
    pub fn new(id: impl Into<String>, range_start: Ipv4Addr, range_end: Ipv4Addr) -> Self {
        Self {
            id: id.into(),
            range_start,
            range_end,
            criteria: PoolCriteria::default(),
            allocated: HashSet::new(),
            cursor: range_start.into(),
        }
    }

    pub fn with_criteria(mut self, criteria: PoolCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Allocate the next available address, scanning forward from the
    /// cursor and wrapping once around the range.
    pub fn allocate(&mut self) -> Option<Ipv4Addr> {
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();
        let span = end - start + 1;

        for offset in 0..span {
            let ip_u32 = start + (self.cursor - start + offset) % span;
            let ip = Ipv4Addr::from(ip_u32);
            if !self.allocated.contains(&ip) {
                self.allocated.insert(ip);
                self.cursor = ip_u32.wrapping_add(1);
                if self.cursor > end {
                    self.cursor = start;
                }
                return Some(ip);
            }
        }

        None
    }

    /// Allocate up to `n` addresses in one pass; returns fewer if the pool
    /// doesn't have enough free addresses left.
    pub fn allocate_n(&mut self, n: usize) -> Vec<Ipv4Addr> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.allocate() {
                Some(ip) => out.push(ip),
                None => break,
            }
        }
        out
    }

    pub fn allocate_specific(&mut self, addr: Ipv4Addr) -> bool {
        if !self.contains(addr) {
            return false;
        }
        if self.allocated.contains(&addr) {
            return false;
        }
        self.allocated.insert(addr);
        true
    }

    pub fn release(&mut self, addr: &Ipv4Addr) {
        self.allocated.remove(addr);
    }

    pub fn is_allocated(&self, addr: &Ipv4Addr) -> bool {
        self.allocated.contains(addr)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();
        let ip: u32 = addr.into();
        ip >= start && ip <= end
    }

    /// Mark an address as allocated, e.g. when restoring leases at startup.
    pub fn mark_allocated(&mut self, addr: Ipv4Addr) {
        if self.contains(addr) {
            self.allocated.insert(addr);
        }
    }

    pub fn available_count(&self) -> u32 {
        self.total_count() - self.allocated.len() as u32
    }

    pub fn total_count(&self) -> u32 {
        let start: u32 = self.range_start.into();
        let end: u32 = self.range_end.into();
        end - start + 1
    }
}

/// Pick the most specific pool whose criteria matches the observed
/// request attributes. Ties are broken by declaration order (first wins).
pub fn select_pool<'a>(
    pools: &'a mut [Ipv4Pool],
    request: &PoolCriteria,
) -> Option<&'a mut Ipv4Pool> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, pool) in pools.iter().enumerate() {
        if !pool.criteria.matches(request) {
            continue;
        }
        let specificity = pool.criteria.specificity();
        match best {
            Some((_, best_spec)) if best_spec >= specificity => {}
            _ => best = Some((idx, specificity)),
        }
    }
    best.map(|(idx, _)| &mut pools[idx])
}

pub fn subnet_mask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    if prefix_len == 0 {
        return Ipv4Addr::new(0, 0, 0, 0);
    }
    if prefix_len >= 32 {
        return Ipv4Addr::new(255, 255, 255, 255);
    }
    let mask: u32 = !0u32 << (32 - prefix_len);
    Ipv4Addr::from(mask)
}

pub fn prefix_len_from_subnet(subnet: &str) -> Option<u8> {
    subnet.split('/').nth(1).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocation() {
        let mut pool = Ipv4Pool::new(
            "default",
            "10.0.10.100".parse().unwrap(),
            "10.0.10.102".parse().unwrap(),
        );

        assert_eq!(pool.total_count(), 3);
        assert_eq!(pool.available_count(), 3);

        let ip1 = pool.allocate().unwrap();
        assert_eq!(ip1, "10.0.10.100".parse::<Ipv4Addr>().unwrap());

        let ip2 = pool.allocate().unwrap();
        assert_eq!(ip2, "10.0.10.101".parse::<Ipv4Addr>().unwrap());

        let ip3 = pool.allocate().unwrap();
        assert_eq!(ip3, "10.0.10.102".parse::<Ipv4Addr>().unwrap());

        assert!(pool.allocate().is_none());

        pool.release(&ip2);
        assert_eq!(pool.available_count(), 1);
        let ip4 = pool.allocate().unwrap();
        assert_eq!(ip4, ip2);
    }

    #[test]
    fn test_allocate_specific() {
        let mut pool = Ipv4Pool::new(
            "default",
            "10.0.10.100".parse().unwrap(),
            "10.0.10.200".parse().unwrap(),
        );

        assert!(pool.allocate_specific("10.0.10.150".parse().unwrap()));
        assert!(!pool.allocate_specific("10.0.10.150".parse().unwrap()));
        assert!(!pool.allocate_specific("10.0.10.50".parse().unwrap()));
    }

    #[test]
    fn test_allocate_n_respects_exhaustion() {
        let mut pool = Ipv4Pool::new(
            "small",
            "10.0.10.100".parse().unwrap(),
            "10.0.10.101".parse().unwrap(),
        );
        let batch = pool.allocate_n(5);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_select_pool_prefers_specificity() {
        let mut pools = vec![
            Ipv4Pool::new(
                "general",
                "10.0.0.10".parse().unwrap(),
                "10.0.0.20".parse().unwrap(),
            ),
            Ipv4Pool::new(
                "voip",
                "10.0.1.10".parse().unwrap(),
                "10.0.1.20".parse().unwrap(),
            )
            .with_criteria(PoolCriteria {
                vendor_class: Some("voip-phone".to_string()),
                ..Default::default()
            }),
        ];

        let request = PoolCriteria {
            vendor_class: Some("voip-phone".to_string()),
            ..Default::default()
        };

        let chosen = select_pool(&mut pools, &request).unwrap();
        assert_eq!(chosen.id, "voip");
    }

    #[test]
    fn test_select_pool_falls_back_to_wildcard() {
        let mut pools = vec![
            Ipv4Pool::new(
                "voip",
                "10.0.1.10".parse().unwrap(),
                "10.0.1.20".parse().unwrap(),
            )
            .with_criteria(PoolCriteria {
                vendor_class: Some("voip-phone".to_string()),
                ..Default::default()
            }),
            Ipv4Pool::new(
                "general",
                "10.0.0.10".parse().unwrap(),
                "10.0.0.20".parse().unwrap(),
            ),
        ];

        let request = PoolCriteria::default();
        let chosen = select_pool(&mut pools, &request).unwrap();
        assert_eq!(chosen.id, "general");
    }

    #[test]
    fn test_subnet_mask() {
        assert_eq!(subnet_mask_from_prefix(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet_mask_from_prefix(16), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(subnet_mask_from_prefix(8), Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(
            subnet_mask_from_prefix(32),
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }
}
