//! Rate limiting logic and state management.

mod bucket;
mod limiter;
mod policy;
mod store;

pub use bucket::TokenBucket;
pub use limiter::{Decision, RateLimiter, Rejection};
pub use policy::{OverrideKey, Policy, PolicyResolver, PolicySource, Resolution};
pub use store::{BucketStore, LruBucketStore, SharedBucket, DEFAULT_MAX_KEYS};
