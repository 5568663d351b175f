use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A validated IPv4 dotted quad advertised as the host's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostAddress(Ipv4Addr);

impl HostAddress {
    pub const FALLBACK: HostAddress = HostAddress(Ipv4Addr::LOCALHOST);

    /// Accepts only non-loopback, non-unspecified IPv4 addresses.
    pub fn candidate(ip: IpAddr) -> Option<Self> {
        match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(Self(v4)),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.0.is_loopback()
    }
}

impl FromStr for HostAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Ipv4Addr rejects anything that is not four decimal octets.
        trimmed
            .parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| SyncError::InvalidAddress {
                value: trimmed.to_string(),
            })
    }
}

impl TryFrom<String> for HostAddress {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HostAddress> for String {
    fn from(value: HostAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_quad() {
        let addr: HostAddress = " 192.168.1.20\n".parse().unwrap();
        assert_eq!(addr.to_string(), "192.168.1.20");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<HostAddress>().is_err());
        assert!("10.0.0".parse::<HostAddress>().is_err());
        assert!("fe80::1".parse::<HostAddress>().is_err());
        assert!("".parse::<HostAddress>().is_err());
    }

    #[test]
    fn test_candidate_skips_loopback_and_v6() {
        assert!(HostAddress::candidate("127.0.0.1".parse().unwrap()).is_none());
        assert!(HostAddress::candidate("0.0.0.0".parse().unwrap()).is_none());
        assert!(HostAddress::candidate("::1".parse().unwrap()).is_none());
        assert!(HostAddress::candidate("10.1.2.3".parse().unwrap()).is_some());
    }

    #[test]
    fn test_fallback_is_ipv4_shaped() {
        let text = HostAddress::FALLBACK.to_string();
        assert_eq!(text, "127.0.0.1");
        assert_eq!(text.split('.').count(), 4);
        assert!(HostAddress::FALLBACK.is_fallback());
    }

    #[test]
    fn test_serde_as_string() {
        let addr: HostAddress = "10.0.0.5".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#""10.0.0.5""#);
        let back: HostAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
