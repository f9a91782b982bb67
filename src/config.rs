//! Configuration management for the throttle filter.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::identity::IdentityMode;
use crate::ratelimit::{Policy, DEFAULT_MAX_KEYS};

/// Message used when none is configured. `%s` is replaced by the rate.
pub const DEFAULT_MESSAGE: &str = "You have exceeded your request rate of %s r/s.";

/// Placeholder substituted with the resolved rate.
pub const RATE_PLACEHOLDER: &str = "%s";

/// Main configuration for a throttle filter.
///
/// ```yaml
/// burst: 10
/// rate: 0.5
/// ip: true
/// overrides:
///   192.168.1.1:
///     burst: 0
///     rate: 0
///   10.0.0.0/8:
///     burst: 100
///     rate: 50
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Default bucket capacity
    pub burst: f64,

    /// Default fill rate in requests per second
    pub rate: f64,

    /// Key on the remote peer address
    #[serde(default)]
    pub ip: bool,

    /// Key on the first forwarded-for address
    #[serde(default)]
    pub xff: bool,

    /// Key on the authenticated username
    #[serde(default)]
    pub username: bool,

    /// Maximum number of live buckets
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Rejection message template
    #[serde(default)]
    pub message: Option<String>,

    /// Per-key and per-block overrides, in configured order
    #[serde(
        default,
        serialize_with = "serialize_overrides",
        deserialize_with = "deserialize_overrides"
    )]
    pub overrides: Vec<(String, OverrideConfig)>,
}

fn default_max_keys() -> usize {
    DEFAULT_MAX_KEYS
}

/// A single override entry. Both fields must be given together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// Overriding capacity
    #[serde(default)]
    pub burst: Option<f64>,

    /// Overriding fill rate
    #[serde(default)]
    pub rate: Option<f64>,
}

impl OverrideConfig {
    /// Create a complete override.
    pub fn new(burst: f64, rate: f64) -> Self {
        Self {
            burst: Some(burst),
            rate: Some(rate),
        }
    }

    /// Resolve into a policy, rejecting partial or invalid entries.
    pub fn policy(&self, key: &str) -> Result<Policy> {
        match (self.burst, self.rate) {
            (Some(burst), Some(rate)) => {
                check_number(&format!("overrides.{}.burst", key), burst)?;
                check_number(&format!("overrides.{}.rate", key), rate)?;
                Ok(Policy::new(burst, rate))
            }
            _ => Err(ThrottleError::Config(format!(
                "override '{}' must set both burst and rate",
                key
            ))),
        }
    }
}

fn check_number(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ThrottleError::Config(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )))
    }
}

impl ThrottleConfig {
    /// Create a configuration with the given defaults and identity mode.
    pub fn new(burst: f64, rate: f64, mode: IdentityMode) -> Self {
        Self {
            burst,
            rate,
            ip: mode == IdentityMode::Ip,
            xff: mode == IdentityMode::Xff,
            username: mode == IdentityMode::Username,
            max_keys: default_max_keys(),
            message: None,
            overrides: Vec::new(),
        }
    }

    /// Append an override. Later entries lose to earlier ones for blocks.
    pub fn with_override(mut self, key: impl Into<String>, burst: f64, rate: f64) -> Self {
        self.overrides.push((key.into(), OverrideConfig::new(burst, rate)));
        self
    }

    /// Set the bucket table capacity.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Set the rejection message template.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The single identity mode selected by the `ip`/`xff`/`username` flags.
    pub fn identity_mode(&self) -> Result<IdentityMode> {
        match (self.ip, self.xff, self.username) {
            (true, false, false) => Ok(IdentityMode::Ip),
            (false, true, false) => Ok(IdentityMode::Xff),
            (false, false, true) => Ok(IdentityMode::Username),
            _ => Err(ThrottleError::Config(
                "exactly one of ip, xff or username must be set".to_string(),
            )),
        }
    }

    /// The default policy applied when no override matches.
    pub fn default_policy(&self) -> Policy {
        Policy::new(self.burst, self.rate)
    }

    /// The rejection message template in effect.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_MESSAGE)
    }

    /// Check every field. Called by [`Self::from_yaml`] and by the limiter.
    pub fn validate(&self) -> Result<()> {
        check_number("burst", self.burst)?;
        check_number("rate", self.rate)?;
        self.identity_mode()?;

        if self.max_keys == 0 {
            return Err(ThrottleError::Config(
                "max_keys must be greater than zero".to_string(),
            ));
        }

        if let Some(message) = &self.message {
            if message.matches(RATE_PLACEHOLDER).count() > 1 {
                return Err(ThrottleError::Config(format!(
                    "message may contain at most one '{}' placeholder",
                    RATE_PLACEHOLDER
                )));
            }
        }

        for (key, entry) in &self.overrides {
            entry.policy(key)?;
        }

        Ok(())
    }
}

fn serialize_overrides<S>(
    overrides: &[(String, OverrideConfig)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(overrides.iter().map(|(k, v)| (k, v)))
}

/// Keep overrides in document order; block matching is first-match-wins.
fn deserialize_overrides<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, OverrideConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedOverrides;

    impl<'de> Visitor<'de> for OrderedOverrides {
        type Value = Vec<(String, OverrideConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of key to {burst, rate}")
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, OverrideConfig>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedOverrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
burst: 10
rate: 0.5
xff: true
max_keys: 500
message: "slow down, %s per second"
overrides:
  10.0.0.0/8:
    burst: 100
    rate: 50
  alice:
    burst: 0
    rate: 0
"#;
        let config = ThrottleConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.burst, 10.0);
        assert_eq!(config.rate, 0.5);
        assert_eq!(config.identity_mode().unwrap(), IdentityMode::Xff);
        assert_eq!(config.max_keys, 500);
        assert_eq!(config.message(), "slow down, %s per second");
        assert_eq!(config.overrides.len(), 2);
        assert_eq!(config.overrides[0].0, "10.0.0.0/8");
        assert_eq!(config.overrides[1].0, "alice");
    }

    #[test]
    fn test_defaults() {
        let config = ThrottleConfig::from_yaml("burst: 1\nrate: 1\nip: true\n").unwrap();
        assert_eq!(config.max_keys, DEFAULT_MAX_KEYS);
        assert_eq!(config.message(), DEFAULT_MESSAGE);
        assert!(config.overrides.is_empty());
    }

    #[test]
    fn test_overrides_keep_document_order() {
        let yaml = r#"
burst: 1
rate: 1
ip: true
overrides:
  zeta: { burst: 1, rate: 1 }
  10.0.0.0/8: { burst: 2, rate: 2 }
  alpha: { burst: 3, rate: 3 }
"#;
        let config = ThrottleConfig::from_yaml(yaml).unwrap();
        let keys: Vec<&str> = config.overrides.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "10.0.0.0/8", "alpha"]);
    }

    #[test]
    fn test_identity_mode_exclusive() {
        let none = ThrottleConfig::from_yaml("burst: 1\nrate: 1\n");
        assert!(matches!(none, Err(ThrottleError::Config(_))));

        let two = ThrottleConfig::from_yaml("burst: 1\nrate: 1\nip: true\nusername: true\n");
        assert!(matches!(two, Err(ThrottleError::Config(_))));

        let three =
            ThrottleConfig::from_yaml("burst: 1\nrate: 1\nip: true\nxff: true\nusername: true\n");
        assert!(matches!(three, Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_missing_required_numbers() {
        let result = ThrottleConfig::from_yaml("rate: 1\nip: true\n");
        assert!(matches!(result, Err(ThrottleError::Yaml(_))));
    }

    #[test]
    fn test_negative_numbers_rejected() {
        let config = ThrottleConfig::new(-1.0, 1.0, IdentityMode::Ip);
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));

        let config = ThrottleConfig::new(1.0, f64::NAN, IdentityMode::Ip);
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));

        let config = ThrottleConfig::new(1.0, 1.0, IdentityMode::Ip).with_override("x", 1.0, -2.0);
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_partial_override_rejected() {
        let yaml = r#"
burst: 1
rate: 1
username: true
overrides:
  bob:
    burst: 5
"#;
        let err = ThrottleConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_zero_max_keys_rejected() {
        let config = ThrottleConfig::new(1.0, 1.0, IdentityMode::Ip).with_max_keys(0);
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_message_with_two_placeholders_rejected() {
        let config = ThrottleConfig::new(1.0, 1.0, IdentityMode::Ip).with_message("%s and %s");
        assert!(matches!(config.validate(), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_builder_sets_one_mode() {
        let config = ThrottleConfig::new(1.0, 1.0, IdentityMode::Username);
        assert!(!config.ip);
        assert!(!config.xff);
        assert!(config.username);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_round_trips_order() {
        let config = ThrottleConfig::new(1.0, 1.0, IdentityMode::Ip)
            .with_override("b", 2.0, 2.0)
            .with_override("a", 3.0, 3.0);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = ThrottleConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.overrides, config.overrides);
    }
}
