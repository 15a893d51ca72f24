//! Rate limiting for metadata backends and provider downloads.
//!
//! Two layers live here:
//! - [`DynamicRateLimiter`]: per-backend sliding window that learns from the
//!   responses it is fed and persists what it learned.
//! - [`RequestGate`]: coarse requests-per-second gate per provider.

mod dynamic;
mod request_gate;
mod store;

pub use dynamic::{
    DynamicRateLimiter, PersistedRateLimitState, RateLimit, RateLimitStats, ResponseRecord,
};
pub use request_gate::{GateRejected, GateStatus, RequestGate, TokenBucket};
pub use store::{FileStateStore, MemoryStateStore, RateLimitStateStore, RateLimitStoreError};
