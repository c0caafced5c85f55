use crate::events::Event;
use crate::MessageBus;
use async_trait::async_trait;
use tracing::debug;

/// No-op message bus for standalone mode. Events are logged but not transmitted.
pub struct NoopMessageBus {
    instance_id: String,
}

impl NoopMessageBus {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
        }
    }
}

#[async_trait]
impl MessageBus for NoopMessageBus {
    async fn publish(&self, event: &Event) -> anyhow::Result<()> {
        debug!(
            instance_id = %self.instance_id,
            event_type = event.topic_suffix(),
            "noop: event published (discarded)"
        );
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        debug!(instance_id = %self.instance_id, "noop: message bus shutdown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_noop_publish() {
        let bus = NoopMessageBus::new("test-01");
        let event = Event::Release {
            instance_id: "test-01".to_string(),
            ip_addr: "10.0.10.5".to_string(),
            mac_addr: "aa:bb:cc:dd:ee:ff".to_string(),
            timestamp: Utc::now(),
        };
        assert!(bus.publish(&event).await.is_ok());
    }
}
