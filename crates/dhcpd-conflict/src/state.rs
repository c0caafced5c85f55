use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

/// How a conflict was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMethod {
    /// The candidate answered a reachability probe before it was offered.
    Probe,
    /// A client sent DHCPDECLINE for the address.
    ClientDecline,
}

/// A single recorded conflict, replicated to the HA peer via
/// conflict-update/conflict-bulk messages (§3 HAMessage).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConflictRecord {
    pub ip: Ipv4Addr,
    pub mac_addr: Option<String>,
    pub subnet_cidr: String,
    pub method: ConflictMethod,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory table of recorded conflicts, keyed by IP. Bulk sync during HA
/// recovery ships the whole table; subsequent conflicts replicate one at a
/// time (conflict-update).
#[derive(Default)]
pub struct ConflictState {
    records: HashMap<Ipv4Addr, ConflictRecord>,
}

impl ConflictState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ConflictRecord) {
        self.records.insert(record.ip, record);
    }

    pub fn clear(&mut self, ip: Ipv4Addr) {
        self.records.remove(&ip);
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<&ConflictRecord> {
        self.records.get(&ip)
    }

    pub fn all(&self) -> Vec<ConflictRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
