pub mod codec;
pub mod handler;
pub mod lease;
pub mod pool;
pub mod ratelimit;
pub mod server;
pub mod subnet;

pub use handler::{DoraReply, Handler};
pub use lease::{InMemoryLeaseStore, LeaseStore, OfferParams};
pub use ratelimit::RateLimiter;
pub use server::ListenerGroup;
pub use subnet::Subnet;
