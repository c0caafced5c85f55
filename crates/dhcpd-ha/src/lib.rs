pub mod fsm;
pub mod transport;

pub use fsm::Fsm;
pub use transport::{HaMessage, HaMessageType, PeerCallbacks, PeerTransport};
