use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dhcpd_core::types::HaState;

/// All events the core publishes through the message bus. External
/// subscribers (metrics, audit logs, a coordinator) consume these; the
/// core itself never reads them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A DISCOVER was received and a subnet was resolved for it.
    Discover {
        instance_id: String,
        mac_addr: String,
        subnet_cidr: String,
        timestamp: DateTime<Utc>,
    },

    /// An OFFER was sent.
    Offer {
        instance_id: String,
        ip_addr: String,
        mac_addr: String,
        pool_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A REQUEST was confirmed with an ACK.
    Ack {
        instance_id: String,
        ip_addr: String,
        mac_addr: String,
        timestamp: DateTime<Utc>,
    },

    /// A REQUEST was rejected with a NAK.
    Nak {
        instance_id: String,
        mac_addr: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A client declined an offered address.
    Decline {
        instance_id: String,
        ip_addr: String,
        mac_addr: String,
        timestamp: DateTime<Utc>,
    },

    /// A lease was released, by the client or by HA replication.
    Release {
        instance_id: String,
        ip_addr: String,
        mac_addr: String,
        timestamp: DateTime<Utc>,
    },

    /// A packet was dropped or a handler error occurred; mirrors the
    /// `packet_errors{reason=...}` counter in the error-handling design.
    PacketError {
        instance_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The HA failover state machine transitioned.
    HaStateChange {
        instance_id: String,
        from: HaState,
        to: HaState,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn instance_id(&self) -> &str {
        match self {
            Event::Discover { instance_id, .. }
            | Event::Offer { instance_id, .. }
            | Event::Ack { instance_id, .. }
            | Event::Nak { instance_id, .. }
            | Event::Decline { instance_id, .. }
            | Event::Release { instance_id, .. }
            | Event::PacketError { instance_id, .. }
            | Event::HaStateChange { instance_id, .. } => instance_id,
        }
    }

    pub fn topic_suffix(&self) -> &str {
        match self {
            Event::Discover { .. }
            | Event::Offer { .. }
            | Event::Ack { .. }
            | Event::Nak { .. }
            | Event::Decline { .. }
            | Event::Release { .. } => "leases",
            Event::PacketError { .. } => "errors",
            Event::HaStateChange { .. } => "ha",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::Nak {
            instance_id: "dhcpd-01".to_string(),
            mac_addr: "aa:bb:cc:dd:ee:ff".to_string(),
            reason: "requested IP not in subnet".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.instance_id(), "dhcpd-01");
        assert_eq!(parsed.topic_suffix(), "leases");
    }

    #[test]
    fn test_ha_state_change_topic() {
        let event = Event::HaStateChange {
            instance_id: "dhcpd-01".to_string(),
            from: HaState::Active,
            to: HaState::Standby,
            reason: "peer claimed active".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.topic_suffix(), "ha");
    }
}
