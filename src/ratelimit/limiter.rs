//! Core rate limiter implementation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::config::{ThrottleConfig, RATE_PLACEHOLDER};
use crate::error::{Result, ThrottleError, STATUS_TOO_MANY_REQUESTS};
use crate::identity::{IdentityMode, IdentitySource};

use super::policy::PolicyResolver;
use super::store::{BucketStore, LruBucketStore};

/// Tokens taken per admitted request.
const TOKENS_PER_REQUEST: f64 = 1.0;

/// Details of a rejected request.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Rendered rejection message
    pub message: String,
    /// The resolved fill rate for the key
    pub rate: f64,
}

impl Rejection {
    /// Status a host should answer with.
    pub fn status_code(&self) -> u16 {
        STATUS_TOO_MANY_REQUESTS
    }
}

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Let the request through
    Admit,
    /// The key has no tokens left
    Reject(Rejection),
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    /// Convert a rejection into [`ThrottleError::RateExceeded`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Admit => Ok(()),
            Decision::Reject(rejection) => Err(ThrottleError::RateExceeded {
                message: rejection.message,
                rate: rejection.rate,
            }),
        }
    }
}

/// Admission control over per-key token buckets.
///
/// This struct is thread-safe and can be shared across request handlers.
/// Each instance owns its own bucket store, so independent limiters never
/// see each other's state.
pub struct RateLimiter {
    /// Attribute requests are keyed on
    mode: IdentityMode,
    /// Default and override policies
    resolver: PolicyResolver,
    /// Live buckets
    store: Arc<dyn BucketStore>,
    /// Rejection message template
    message: String,
}

impl RateLimiter {
    /// Create a rate limiter backed by an in-memory LRU store.
    pub fn new(config: &ThrottleConfig) -> Result<Self> {
        let max_keys = NonZeroUsize::new(config.max_keys).ok_or_else(|| {
            ThrottleError::Config("max_keys must be greater than zero".to_string())
        })?;
        Self::with_store(config, Arc::new(LruBucketStore::new(max_keys)))
    }

    /// Create a rate limiter using a caller-supplied store.
    ///
    /// `max_keys` is ignored; the store decides its own bounds.
    pub fn with_store(config: &ThrottleConfig, store: Arc<dyn BucketStore>) -> Result<Self> {
        config.validate()?;
        let mode = config.identity_mode()?;
        let resolver = PolicyResolver::from_config(config)?;

        let (exact, blocks) = resolver.override_counts();
        info!(
            mode = %mode,
            burst = config.burst,
            rate = config.rate,
            exact_overrides = exact,
            block_overrides = blocks,
            "Rate limiter initialized"
        );

        Ok(Self {
            mode,
            resolver,
            store,
            message: config.message().to_string(),
        })
    }

    /// The identity mode requests are keyed on.
    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    /// The policy resolver in use.
    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Extract the identity from `request` and check it.
    pub fn check_request<S: IdentitySource + ?Sized>(&self, request: &S) -> Result<Decision> {
        match self.mode.extract(request) {
            Some(key) => self.check(&key),
            None => Err(ThrottleError::MissingIdentity { mode: self.mode }),
        }
    }

    /// Check the rate limit for `key`, consuming one token if admitted.
    ///
    /// An empty key, or a chain whose first element is empty, is a
    /// [`ThrottleError::MissingIdentity`], not a rejection.
    pub fn check(&self, key: &str) -> Result<Decision> {
        let resolution = self.resolver.resolve(key);
        if resolution.key.is_empty() {
            return Err(ThrottleError::MissingIdentity { mode: self.mode });
        }
        let policy = resolution.policy;

        trace!(
            key = %resolution.key,
            source = %resolution.source,
            burst = policy.burst,
            rate = policy.rate,
            "Checking rate limit"
        );

        if policy.is_unlimited() {
            return Ok(Decision::Admit);
        }

        let bucket = self.store.get_or_create(resolution.key, policy);
        let admitted = bucket.lock().consume(TOKENS_PER_REQUEST);

        if admitted {
            Ok(Decision::Admit)
        } else {
            debug!(
                key = %resolution.key,
                rate = policy.rate,
                "Rate limit exceeded"
            );
            Ok(Decision::Reject(Rejection {
                message: self.format_message(policy.rate),
                rate: policy.rate,
            }))
        }
    }

    /// Get the number of live buckets.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no buckets have been created yet.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Templates without a placeholder get the rate appended.
    fn format_message(&self, rate: f64) -> String {
        if self.message.contains(RATE_PLACEHOLDER) {
            self.message.replacen(RATE_PLACEHOLDER, &rate.to_string(), 1)
        } else {
            format!("{} {}", self.message, rate)
        }
    }
}
