use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::process::Command;

use crate::domain::config::MonitorConfig;
use crate::domain::models::HostAddress;
use crate::error::{Result, SyncError};
use crate::utils;

/// One way of finding the host's address. Strategies are tried in order
/// and each one is bounded by the caller's timeout.
#[async_trait]
pub trait ProbeStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn probe(&self) -> Result<HostAddress>;
}

/// First non-loopback IPv4 token in whitespace separated text.
pub fn first_candidate(text: &str) -> Option<HostAddress> {
    text.split_whitespace()
        .filter_map(|token| token.parse::<IpAddr>().ok())
        .find_map(HostAddress::candidate)
}

/// Like `first_candidate`, but only tokens found in `allowed`.
pub fn first_allowed_candidate(text: &str, allowed: &[Ipv4Addr]) -> Option<HostAddress> {
    text.split_whitespace()
        .filter_map(|token| token.parse::<IpAddr>().ok())
        .filter(|ip| matches!(ip, IpAddr::V4(v4) if allowed.contains(v4)))
        .find_map(HostAddress::candidate)
}

pub(crate) async fn resolve_candidate(host: &str) -> Option<HostAddress> {
    tokio::net::lookup_host((host, 0))
        .await
        .ok()?
        .find_map(|addr| HostAddress::candidate(addr.ip()))
}

/// `hostname -I`, falling back to resolving the machine's own name where
/// the binary lacks `-I` (busybox, macOS). Addresses of docker and other
/// virtual bridges are skipped when interfaces can be listed.
pub struct HostnameCommand;

impl HostnameCommand {
    const NAME: &'static str = "hostname-cmd";

    async fn from_command() -> Option<HostAddress> {
        let output = Command::new("hostname")
            .arg("-I")
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            log::debug!("hostname -I exited with {}", output.status);
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match utils::local_ipv4_addrs() {
            Ok(physical) => first_allowed_candidate(&stdout, &physical),
            Err(e) => {
                log::debug!("Cannot list interfaces ({}), taking the first address", e);
                first_candidate(&stdout)
            }
        }
    }
}

#[async_trait]
impl ProbeStrategy for HostnameCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe(&self) -> Result<HostAddress> {
        if let Some(address) = Self::from_command().await {
            return Ok(address);
        }
        let hostname = utils::get_hostname();
        resolve_candidate(&hostname).await.ok_or_else(|| {
            SyncError::unavailable(
                Self::NAME,
                format!("no address from `hostname -I` or lookup of {}", hostname),
            )
        })
    }
}

/// Source address the kernel would pick for a route to `target`.
/// Connecting a UDP socket sends nothing.
pub struct DefaultRoute {
    target: String,
}

impl DefaultRoute {
    const NAME: &'static str = "default-route";

    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl ProbeStrategy for DefaultRoute {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe(&self) -> Result<HostAddress> {
        let unavailable = |e: std::io::Error| SyncError::unavailable(Self::NAME, e.to_string());
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(unavailable)?;
        socket.connect(&self.target).await.map_err(unavailable)?;
        let local = socket.local_addr().map_err(unavailable)?;
        HostAddress::candidate(local.ip()).ok_or_else(|| {
            SyncError::unavailable(Self::NAME, format!("route source {} is not usable", local.ip()))
        })
    }
}

pub struct InterfaceScan;

impl InterfaceScan {
    const NAME: &'static str = "interfaces";
}

#[async_trait]
impl ProbeStrategy for InterfaceScan {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe(&self) -> Result<HostAddress> {
        let addrs =
            utils::local_ipv4_addrs().map_err(|e| SyncError::unavailable(Self::NAME, e.to_string()))?;
        addrs
            .into_iter()
            .find_map(|ip| HostAddress::candidate(ip.into()))
            .ok_or_else(|| SyncError::unavailable(Self::NAME, "no non-loopback IPv4 interface"))
    }
}

/// Operator supplied address: `HOST_IP_OVERRIDE` first, then `HOST_IP`.
pub struct EnvOverride {
    values: Vec<(&'static str, Option<String>)>,
}

impl EnvOverride {
    const NAME: &'static str = "env-override";

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = [MonitorConfig::ENV_OVERRIDE, MonitorConfig::ENV_HOST_IP]
            .into_iter()
            .map(|key| (key, lookup(key).filter(|v| !v.trim().is_empty())))
            .collect();
        Self { values }
    }
}

#[async_trait]
impl ProbeStrategy for EnvOverride {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe(&self) -> Result<HostAddress> {
        for (key, value) in &self.values {
            let Some(value) = value else {
                continue;
            };
            match value.parse::<HostAddress>() {
                Ok(address) => return Ok(address),
                Err(e) => log::warn!("Ignoring {}: {}", key, e),
            }
        }
        Err(SyncError::unavailable(Self::NAME, "no override set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_first_candidate_skips_loopback_and_v6() {
        let out = "127.0.0.1 fe80::1 192.168.1.44 10.0.0.2 \n";
        assert_eq!(first_candidate(out), Some("192.168.1.44".parse().unwrap()));
        assert_eq!(first_candidate("127.0.1.1"), None);
        assert_eq!(first_candidate(""), None);
    }

    #[test]
    fn test_allowed_candidate_skips_bridge_addresses() {
        let out = "172.17.0.1 192.168.1.44 10.0.0.2\n";
        let physical = [Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(192, 168, 1, 44)];
        assert_eq!(
            first_allowed_candidate(out, &physical),
            Some("192.168.1.44".parse().unwrap())
        );
        assert_eq!(first_allowed_candidate("172.17.0.1", &physical), None);
        assert_eq!(first_allowed_candidate(out, &[]), None);
    }

    #[tokio::test]
    async fn test_env_override_prefers_override_var() {
        let strategy = EnvOverride::from_lookup(lookup(&[
            ("HOST_IP_OVERRIDE", "10.0.0.5"),
            ("HOST_IP", "10.0.0.9"),
        ]));
        assert_eq!(strategy.probe().await.unwrap().to_string(), "10.0.0.5");
    }

    #[tokio::test]
    async fn test_env_override_falls_back_to_host_ip() {
        let strategy = EnvOverride::from_lookup(lookup(&[
            ("HOST_IP_OVERRIDE", "not-an-ip"),
            ("HOST_IP", "10.0.0.9"),
        ]));
        assert_eq!(strategy.probe().await.unwrap().to_string(), "10.0.0.9");
    }

    #[tokio::test]
    async fn test_env_override_unset() {
        let strategy = EnvOverride::from_lookup(lookup(&[("HOST_IP", "  ")]));
        assert!(matches!(
            strategy.probe().await,
            Err(SyncError::ProbeUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_route_rejects_bad_target() {
        let strategy = DefaultRoute::new("not a socket address");
        assert!(strategy.probe().await.is_err());
    }
}
