//! Service registrations and network addresses
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a backend instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI authority (`host:port`), bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// One running backend instance as known to the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Registration identifier, unique within the registry
    pub id: String,
    /// Logical service name, e.g. `auth-service`
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceRegistration {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: Address) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority() {
        assert_eq!(Address::new("10.0.0.5", 4000).authority(), "10.0.0.5:4000");
        assert_eq!(Address::new("::1", 4000).authority(), "[::1]:4000");
        assert_eq!(Address::new("auth.internal", 80).to_string(), "auth.internal:80");
    }
}
