//! Device endpoint addresses.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Validated WebSocket address of the device, e.g. `ws://192.168.4.1:81/ws`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Parse and validate an endpoint address
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let input = input.trim();
        let invalid = |reason: &str| LinkError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(input).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(invalid(&format!("scheme must be ws or wss, got {}", other))),
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(invalid("missing host")),
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("credentials are not allowed"));
        }

        Ok(Self { url })
    }

    /// Full address as text
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Host part of the address
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port, falling back to the scheme default
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Whether the address uses TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = LinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.url.into()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_endpoints() {
        let endpoint = Endpoint::parse("ws://192.168.4.1:81/ws").unwrap();
        assert_eq!(endpoint.host(), "192.168.4.1");
        assert_eq!(endpoint.port(), Some(81));
        assert!(!endpoint.is_secure());

        let endpoint: Endpoint = "wss://washer.local/telemetry".parse().unwrap();
        assert_eq!(endpoint.port(), Some(443));
        assert!(endpoint.is_secure());
    }

    #[test]
    fn test_rejects_malformed_endpoints() {
        for input in [
            "",
            "192.168.4.1:81",
            "http://192.168.4.1/ws",
            "ws://",
            "ws://user:pw@device/ws",
            "not a url",
        ] {
            assert!(
                matches!(Endpoint::parse(input), Err(LinkError::InvalidEndpoint { .. })),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_serde_validates() {
        let endpoint: Endpoint = serde_json::from_str(r#""ws://10.0.0.7:81/""#).unwrap();
        assert_eq!(endpoint.as_str(), "ws://10.0.0.7:81/");
        assert!(serde_json::from_str::<Endpoint>(r#""ftp://10.0.0.7""#).is_err());
    }
}
