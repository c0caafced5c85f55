use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// DHCP lease record, owned by whatever lease store the operator plugs in.
///
/// The core never persists this itself (see [`crate::config`] and the
/// `LeaseStore` trait in `dhcpd-dhcp`) — this type is the shared currency
/// between the DORA handler and the collaborator that stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub ip_addr: Ipv4Addr,
    pub mac_addr: String,
    pub client_id: Option<String>,
    pub hostname: Option<String>,
    pub subnet_cidr: String,
    pub pool_id: String,
    pub state: LeaseState,
    pub start: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    /// Monotonically increasing per originating HA node; attached to
    /// replicated lease-update messages so peers can detect reordering.
    pub seq: u64,
    pub relay: Option<RelayAgentInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Offered,
    Active,
    Expired,
    Released,
    Declined,
}

/// RFC 3046 Relay Agent Information, plus RFC 3527 link selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAgentInfo {
    pub circuit_id: Option<String>,
    pub remote_id: Option<String>,
    pub link_selection: Option<Ipv4Addr>,
    /// Original sub-option bytes, preserved so they can be echoed back
    /// byte-for-byte per RFC 3046.
    pub raw: Vec<u8>,
}

/// Match criteria used to select a pool within a subnet. Any field left
/// `None` is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCriteria {
    pub vendor_class: Option<String>,
    pub user_class: Option<String>,
    pub circuit_id: Option<String>,
    pub remote_id: Option<String>,
}

impl PoolCriteria {
    /// Number of concrete (non-wildcard) fields set.
    pub fn specificity(&self) -> u32 {
        [
            &self.vendor_class,
            &self.user_class,
            &self.circuit_id,
            &self.remote_id,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count() as u32
    }

    /// True if every concrete field on `self` matches the corresponding
    /// field on `request` (wildcards on `self` always match).
    pub fn matches(&self, request: &PoolCriteria) -> bool {
        Self::field_matches(&self.vendor_class, &request.vendor_class)
            && Self::field_matches(&self.user_class, &request.user_class)
            && Self::field_matches(&self.circuit_id, &request.circuit_id)
            && Self::field_matches(&self.remote_id, &request.remote_id)
    }

    fn field_matches(criterion: &Option<String>, observed: &Option<String>) -> bool {
        match criterion {
            None => true,
            Some(want) => observed.as_deref() == Some(want.as_str()),
        }
    }
}

/// HA failover state. A node is "serving" iff `is_active()` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    PartnerUp,
    PartnerDown,
    Active,
    Standby,
    Recovery,
}

impl HaState {
    pub fn is_active(self) -> bool {
        matches!(self, HaState::Active | HaState::PartnerDown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaRole {
    Primary,
    Secondary,
}

impl HaRole {
    pub fn initial_state(self) -> HaState {
        match self {
            HaRole::Primary => HaState::Active,
            HaRole::Secondary => HaState::Standby,
        }
    }
}
