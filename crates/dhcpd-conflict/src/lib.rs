pub mod monitor;
pub mod probe;
pub mod rogue;
pub mod state;

pub use monitor::{ConflictDetector, InMemoryConflictDetector};
pub use probe::{ProbeTransport, TcpReachabilityProbe};
pub use rogue::{InMemoryRogueDetector, RogueServerDetector};
pub use state::{ConflictMethod, ConflictRecord, ConflictState};
