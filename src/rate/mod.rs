//! Outbound bandwidth control: the token-bucket limiter (§4.A) and the
//! sliding-window throughput tracker (§4.B).

pub mod limiter;
pub mod throughput;

pub use limiter::{RateLimiter, UNLIMITED};
pub use throughput::{ThroughputTracker, ThroughputWriter};
