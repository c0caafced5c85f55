pub mod events;
pub mod noop;

use async_trait::async_trait;
use events::Event;

/// The event-bus abstraction the DORA handler and HA FSM publish through.
/// `publish` must never block the caller — a real backend is expected to
/// buffer or drop under backpressure rather than stall the DORA path or a
/// failover transition.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(&self, event: &Event) -> anyhow::Result<()>;

    /// Gracefully shut down the message bus.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Create a message bus from configuration. Only the `noop` backend ships
/// in this repository — metrics exposition and message-bus wire formats are
/// out of scope (§1); an operator who needs one plugs a `MessageBus` impl
/// in behind this same factory.
pub fn create_message_bus(_backend: &str, instance_id: &str) -> Box<dyn MessageBus> {
    Box::new(noop::NoopMessageBus::new(instance_id))
}
