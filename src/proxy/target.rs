//! Target identifier extraction.
//!
//! A target identifier names the destination of an intercepted request. It is
//! used verbatim as the policy key:
//!
//! - `GET http://a.test/x HTTP/1.1` -> `http://a.test/x`
//! - `CONNECT a.test:443 HTTP/1.1` -> `a.test:443`
//!
//! Identifiers are opaque and case-sensitive. Nothing beyond what the HTTP
//! parser hands us is normalized.

use super::error::ProxyError;
use hyper::{Method, Request};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Canonical, never-empty name of a network destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Create a target identifier. Returns `None` for an empty string.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() { None } else { Some(Self(value)) }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TargetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetId {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| ProxyError::MalformedTarget("empty target".into()))
    }
}

impl From<TargetId> for String {
    fn from(target: TargetId) -> Self {
        target.0
    }
}

/// Extract the target identifier from an inbound proxy request.
///
/// `CONNECT` requests must carry an authority. Every other method must use
/// the absolute form (`scheme://host/...`); origin-form requests such as
/// `GET / HTTP/1.1` are what a client sends to a server, not to a proxy, and
/// are rejected.
pub fn extract_target<B>(req: &Request<B>) -> Result<TargetId, ProxyError> {
    let uri = req.uri();

    if req.method() == Method::CONNECT {
        let authority = uri
            .authority()
            .ok_or_else(|| ProxyError::MalformedTarget("CONNECT without authority".into()))?;
        return TargetId::try_from(authority.to_string());
    }

    if uri.scheme().is_none() || uri.host().is_none_or(str::is_empty) {
        return Err(ProxyError::MalformedTarget(format!(
            "expected absolute URI, got '{}'",
            uri
        )));
    }

    TargetId::try_from(uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str) -> Request<()> {
        Request::builder().method(method).uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_absolute_form_is_kept_verbatim() {
        let target = extract_target(&request(Method::GET, "http://a.test/x")).unwrap();
        assert_eq!(target.as_str(), "http://a.test/x");
    }

    #[test]
    fn test_query_is_part_of_target() {
        let target = extract_target(&request(Method::GET, "http://a.test/x?y=1")).unwrap();
        assert_eq!(target.as_str(), "http://a.test/x?y=1");
    }

    #[test]
    fn test_case_is_preserved_in_path() {
        let target = extract_target(&request(Method::POST, "http://a.test/Upper")).unwrap();
        assert_eq!(target.as_str(), "http://a.test/Upper");
    }

    #[test]
    fn test_connect_uses_authority() {
        let target = extract_target(&request(Method::CONNECT, "api.example.com:443")).unwrap();
        assert_eq!(target.as_str(), "api.example.com:443");
    }

    #[test]
    fn test_origin_form_is_malformed() {
        let result = extract_target(&request(Method::GET, "/index.html"));
        assert!(matches!(result, Err(ProxyError::MalformedTarget(_))));
    }

    #[test]
    fn test_asterisk_form_is_malformed() {
        let result = extract_target(&request(Method::OPTIONS, "*"));
        assert!(matches!(result, Err(ProxyError::MalformedTarget(_))));
    }

    #[test]
    fn test_empty_target_rejected() {
        assert!(TargetId::new("").is_none());
        assert!(TargetId::try_from(String::new()).is_err());
    }

    #[test]
    fn test_serde_rejects_empty() {
        let ok: Result<TargetId, _> = serde_json::from_str("\"http://a.test/\"");
        assert!(ok.is_ok());
        let empty: Result<TargetId, _> = serde_json::from_str("\"\"");
        assert!(empty.is_err());
    }
}
