//! Identity extraction.
//!
//! A limiter keys its buckets on exactly one request attribute: the peer
//! address, the `X-Forwarded-For` header, or the authenticated username.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header consulted in [`IdentityMode::Xff`] mode.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Which request attribute identifies the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Remote peer address
    Ip,
    /// First address of the forwarded-for chain
    Xff,
    /// Authenticated username
    Username,
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityMode::Ip => "ip",
            IdentityMode::Xff => "xff",
            IdentityMode::Username => "username",
        };
        f.write_str(name)
    }
}

/// Request-side view needed to pull an identity out of a host request.
///
/// Host frameworks implement this for their request type.
pub trait IdentitySource {
    /// Remote peer address, as a literal.
    fn remote_addr(&self) -> Option<String>;

    /// Raw value of a request header. Names are lowercase.
    fn header(&self, name: &str) -> Option<String>;

    /// Username established by an earlier authentication step.
    fn username(&self) -> Option<String>;
}

impl IdentityMode {
    /// Extract the identity for this mode. Empty values count as missing.
    pub fn extract<S: IdentitySource + ?Sized>(&self, source: &S) -> Option<String> {
        let value = match self {
            IdentityMode::Ip => source.remote_addr(),
            IdentityMode::Xff => source.header(FORWARDED_FOR_HEADER),
            IdentityMode::Username => source.username(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// The effective key of a possibly comma-delimited address chain.
///
/// Only the first element is used, trimmed of surrounding whitespace.
pub fn first_in_chain(key: &str) -> &str {
    key.split(',').next().unwrap_or(key).trim()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal request used by tests across the crate.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct TestRequest {
        pub remote_addr: Option<String>,
        pub headers: HashMap<String, String>,
        pub username: Option<String>,
    }

    impl TestRequest {
        pub(crate) fn from_addr(addr: &str) -> Self {
            Self {
                remote_addr: Some(addr.to_string()),
                ..Default::default()
            }
        }

        pub(crate) fn forwarded_for(value: &str) -> Self {
            let mut headers = HashMap::new();
            headers.insert(FORWARDED_FOR_HEADER.to_string(), value.to_string());
            Self {
                headers,
                ..Default::default()
            }
        }
    }

    impl IdentitySource for TestRequest {
        fn remote_addr(&self) -> Option<String> {
            self.remote_addr.clone()
        }

        fn header(&self, name: &str) -> Option<String> {
            self.headers.get(name).cloned()
        }

        fn username(&self) -> Option<String> {
            self.username.clone()
        }
    }

    #[test]
    fn test_extract_per_mode() {
        let mut request = TestRequest::from_addr("10.0.0.1");
        request
            .headers
            .insert(FORWARDED_FOR_HEADER.to_string(), "1.1.1.1".to_string());
        request.username = Some("alice".to_string());

        assert_eq!(IdentityMode::Ip.extract(&request).as_deref(), Some("10.0.0.1"));
        assert_eq!(IdentityMode::Xff.extract(&request).as_deref(), Some("1.1.1.1"));
        assert_eq!(IdentityMode::Username.extract(&request).as_deref(), Some("alice"));
    }

    #[test]
    fn test_extract_missing_or_empty() {
        let request = TestRequest::from_addr("10.0.0.1");
        assert!(IdentityMode::Username.extract(&request).is_none());
        assert!(IdentityMode::Xff.extract(&request).is_none());

        let request = TestRequest::forwarded_for("  ");
        assert!(IdentityMode::Xff.extract(&request).is_none());
    }

    #[test]
    fn test_first_in_chain() {
        assert_eq!(first_in_chain("1.1.1.1,2.2.2.2"), "1.1.1.1");
        assert_eq!(first_in_chain(" 1.1.1.1 , 2.2.2.2"), "1.1.1.1");
        assert_eq!(first_in_chain("alice"), "alice");
    }

    #[test]
    fn test_display() {
        assert_eq!(IdentityMode::Ip.to_string(), "ip");
        assert_eq!(IdentityMode::Xff.to_string(), "xff");
        assert_eq!(IdentityMode::Username.to_string(), "username");
    }
}
