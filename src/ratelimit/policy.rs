//! Policy resolution.
//!
//! Overrides are classified once, when the resolver is built: a key that
//! parses as a multi-host network becomes a block override, anything else
//! (usernames, plain addresses, single-host prefixes, malformed CIDR) is
//! matched exactly.

use ipnet::IpNet;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

use crate::config::ThrottleConfig;
use crate::error::Result;
use crate::identity::first_in_chain;

/// The `(burst, rate)` pair used to size a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    /// Bucket capacity
    pub burst: f64,
    /// Tokens added per second
    pub rate: f64,
}

impl Policy {
    /// Create a policy.
    pub fn new(burst: f64, rate: f64) -> Self {
        Self { burst, rate }
    }

    /// A zero burst or rate means the key is not throttled at all.
    pub fn is_unlimited(&self) -> bool {
        self.burst == 0.0 || self.rate == 0.0
    }
}

/// How an override key is matched against request keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideKey {
    /// Literal key comparison
    Exact(String),
    /// Address containment in a multi-host network
    Block(IpNet),
}

impl OverrideKey {
    /// Classify a configured override key.
    pub fn classify(key: &str) -> Self {
        match key.parse::<IpNet>() {
            Ok(net) if net.prefix_len() == net.max_prefix_len() => {
                OverrideKey::Exact(net.addr().to_string())
            }
            Ok(net) => OverrideKey::Block(net.trunc()),
            Err(_) => OverrideKey::Exact(key.to_string()),
        }
    }
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// No override matched
    Default,
    /// An exact-key override matched
    Exact,
    /// A block override matched
    Block(IpNet),
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Default => f.write_str("default"),
            PolicySource::Exact => f.write_str("exact"),
            PolicySource::Block(net) => write!(f, "block {}", net),
        }
    }
}

/// Outcome of resolving a request key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution<'k> {
    /// Key to use for bucket lookup
    pub key: &'k str,
    /// Effective policy
    pub policy: Policy,
    /// Which rule produced the policy
    pub source: PolicySource,
}

/// Resolves the effective policy for a request key.
///
/// Exact overrides always win over blocks; among blocks the first
/// configured match wins. The tables are immutable once built.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    default: Policy,
    exact: HashMap<String, Policy>,
    blocks: Vec<(IpNet, Policy)>,
}

impl PolicyResolver {
    /// Create a resolver with no overrides.
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            exact: HashMap::new(),
            blocks: Vec::new(),
        }
    }

    /// Build a resolver from the configured defaults and overrides.
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        let mut resolver = Self::new(config.default_policy());
        for (key, entry) in &config.overrides {
            resolver.add_override(key, entry.policy(key)?);
        }
        Ok(resolver)
    }

    /// Register an override. Earlier registrations win on conflicts.
    pub fn add_override(&mut self, key: &str, policy: Policy) {
        let classified = OverrideKey::classify(key);
        debug!(
            key = %key,
            kind = ?classified,
            burst = policy.burst,
            rate = policy.rate,
            "Registered override"
        );

        match classified {
            OverrideKey::Exact(exact) => {
                self.exact.entry(exact).or_insert(policy);
            }
            OverrideKey::Block(net) => self.blocks.push((net, policy)),
        }
    }

    /// The policy used when nothing matches.
    pub fn default_policy(&self) -> Policy {
        self.default
    }

    /// Number of exact and block overrides.
    pub fn override_counts(&self) -> (usize, usize) {
        (self.exact.len(), self.blocks.len())
    }

    /// Resolve the policy and bucket key for `key`.
    ///
    /// A comma-delimited chain is reduced to its first element, which is
    /// also the returned bucket key. An exact override on the raw value
    /// is still honored.
    pub fn resolve<'k>(&self, key: &'k str) -> Resolution<'k> {
        let effective = first_in_chain(key);

        // Usernames and other non-addresses never match a block
        let addr = effective.parse::<IpAddr>().ok();

        // Address overrides are stored in canonical form
        let exact = self
            .exact
            .get(key)
            .or_else(|| self.exact.get(effective))
            .or_else(|| addr.and_then(|addr| self.exact.get(&addr.to_string())));
        if let Some(policy) = exact {
            return Resolution {
                key: effective,
                policy: *policy,
                source: PolicySource::Exact,
            };
        }

        if let Some(addr) = addr {
            let matched = self.blocks.iter().find(|(net, _)| net.contains(&addr));
            if let Some((net, policy)) = matched {
                return Resolution {
                    key: effective,
                    policy: *policy,
                    source: PolicySource::Block(*net),
                };
            }
        }

        Resolution {
            key: effective,
            policy: self.default,
            source: PolicySource::Default,
        }
    }
}
