//! Bucket storage.
//!
//! The limiter never owns buckets directly; it goes through a
//! [`BucketStore`] so that the default bounded LRU table can be swapped
//! for a caller-supplied engine.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

use super::bucket::TokenBucket;
use super::policy::Policy;

/// Default number of keys kept by [`LruBucketStore`].
pub const DEFAULT_MAX_KEYS: usize = 10000;

/// A bucket shared between the store and concurrent callers.
pub type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Storage engine mapping keys to live buckets.
///
/// Implementations only need `get` and `put`. Stores that can make the
/// lookup-or-insert sequence atomic should override [`Self::get_or_create`].
pub trait BucketStore: Send + Sync {
    /// Look up a bucket, marking it recently used.
    fn get(&self, key: &str) -> Option<SharedBucket>;

    /// Insert or replace a bucket.
    fn put(&self, key: &str, bucket: SharedBucket);

    /// Number of buckets currently held.
    fn len(&self) -> usize;

    /// Whether the store holds no buckets.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the bucket for `key`, creating it from `policy` if absent.
    ///
    /// An existing bucket keeps its own capacity and rate.
    fn get_or_create(&self, key: &str, policy: Policy) -> SharedBucket {
        if let Some(bucket) = self.get(key) {
            return bucket;
        }
        let bucket = Arc::new(Mutex::new(TokenBucket::new(policy.burst, policy.rate)));
        self.put(key, bucket.clone());
        bucket
    }
}

/// Fixed-capacity in-memory store that evicts the least recently used key.
pub struct LruBucketStore {
    buckets: Mutex<LruCache<String, SharedBucket>>,
}

impl LruBucketStore {
    /// Create a store holding at most `max_keys` buckets.
    pub fn new(max_keys: NonZeroUsize) -> Self {
        Self {
            buckets: Mutex::new(LruCache::new(max_keys)),
        }
    }

    /// Maximum number of buckets.
    pub fn capacity(&self) -> usize {
        self.buckets.lock().cap().get()
    }

    /// Whether `key` is present, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.lock().contains(key)
    }
}

impl Default for LruBucketStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MAX_KEYS).unwrap_or(NonZeroUsize::MIN))
    }
}

impl BucketStore for LruBucketStore {
    fn get(&self, key: &str) -> Option<SharedBucket> {
        self.buckets.lock().get(key).cloned()
    }

    fn put(&self, key: &str, bucket: SharedBucket) {
        if let Some((evicted, _)) = self.buckets.lock().push(key.to_string(), bucket) {
            if evicted != key {
                debug!(key = %evicted, "Evicted least recently used bucket");
            }
        }
    }

    fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    fn get_or_create(&self, key: &str, policy: Policy) -> SharedBucket {
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }

        debug!(
            key = %key,
            burst = policy.burst,
            rate = policy.rate,
            "Creating new token bucket"
        );
        let bucket = Arc::new(Mutex::new(TokenBucket::new(policy.burst, policy.rate)));
        if let Some((evicted, _)) = buckets.push(key.to_string(), bucket.clone()) {
            debug!(key = %evicted, "Evicted least recently used bucket");
        }
        bucket
    }
}
