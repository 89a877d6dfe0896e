use crate::constants::rm::ANONYMOUS_URI;
use serde::{Deserialize, Serialize};
use std::fmt;

/// WS-Addressing endpoint reference, reduced to its address URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointReference(String);

impl EndpointReference {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The anonymous reference, meaning "reply on the back channel"
    pub fn anonymous() -> Self {
        Self(ANONYMOUS_URI.to_string())
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_URI
    }

    /// Last path segment of the address, used as the service name
    pub fn service_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for EndpointReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointReference {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for EndpointReference {
    fn from(address: String) -> Self {
        Self(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_from_address() {
        let epr = EndpointReference::new("http://localhost:8280/services/StockQuote");
        assert_eq!(epr.service_name(), "StockQuote");

        let trailing = EndpointReference::new("http://localhost:8280/services/Orders/");
        assert_eq!(trailing.service_name(), "Orders");

        assert_eq!(EndpointReference::new("Local").service_name(), "Local");
    }

    #[test]
    fn test_anonymous() {
        assert!(EndpointReference::anonymous().is_anonymous());
        assert!(!EndpointReference::new("http://example.com").is_anonymous());
    }
}
