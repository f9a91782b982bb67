//! Throttle - per-key admission control
//!
//! This crate decides, per request, whether to admit or reject based on a
//! token bucket keyed on the client address, the first forwarded-for
//! address, or the authenticated username. Exact-key and CIDR-block
//! overrides adjust the default burst and rate, and buckets live in a
//! bounded LRU table so memory stays flat under many distinct keys.

pub mod config;
pub mod error;
pub mod identity;
pub mod ratelimit;

pub use config::ThrottleConfig;
pub use error::{Result, ThrottleError};
pub use identity::{IdentityMode, IdentitySource};
pub use ratelimit::{Decision, RateLimiter};
