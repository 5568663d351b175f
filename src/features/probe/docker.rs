//! Last-resort guesses for containers that cannot see the host's interfaces.
//!
//! Neither step is reliable. `host.docker.internal` only exists on Docker
//! Desktop or with an explicit `extra_hosts` entry, and the /24 scan assumes
//! the host sits next to the gateway on one of a handful of common suffixes.
//! A refused TCP connection counts as "someone is there", which is all the
//! scan can tell.
//!
//! The scan stops once the strategy's time budget is spent, so the suffix
//! order is also a priority order: later suffixes may never be tried.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::domain::config::ProbeConfig;
use crate::domain::models::HostAddress;
use crate::error::{Result, SyncError};
use crate::features::probe::strategies::{resolve_candidate, ProbeStrategy};

/// Left over from the strategy budget so the scan can report why it gave up
/// before the caller's timeout fires.
const SCAN_MARGIN: Duration = Duration::from_millis(100);

pub struct DockerHeuristic {
    host_name: String,
    route_table: PathBuf,
    suffixes: Vec<u8>,
    ports: Vec<u16>,
    reach_timeout: Duration,
    budget: Duration,
}

impl DockerHeuristic {
    const NAME: &'static str = "docker-heuristic";

    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            host_name: config.docker_host_name.clone(),
            route_table: config.route_table.clone(),
            suffixes: config.docker_suffixes.clone(),
            ports: config.reachability_ports.clone(),
            reach_timeout: config.reachability_timeout(),
            budget: config.timeout(),
        }
    }

    async fn scan_gateway_subnet(&self, deadline: Instant) -> Result<HostAddress> {
        let table = tokio::fs::read_to_string(&self.route_table)
            .await
            .map_err(|e| SyncError::unavailable(Self::NAME, format!("{}: {}", self.route_table.display(), e)))?;
        let gateway = parse_default_gateway(&table)
            .ok_or_else(|| SyncError::unavailable(Self::NAME, "no default gateway"))?;
        log::debug!("Default gateway {}, scanning its /24", gateway);

        let candidates = candidate_hosts(gateway, &self.suffixes);
        for (tried, candidate) in candidates.iter().copied().enumerate() {
            if Instant::now() >= deadline {
                return Err(SyncError::unavailable(
                    Self::NAME,
                    format!(
                        "time budget spent after {} of {} candidates near gateway {}",
                        tried,
                        candidates.len(),
                        gateway
                    ),
                ));
            }
            if self.reachable(candidate, deadline).await {
                log::debug!("Heuristic candidate {} answered", candidate);
                if let Some(address) = HostAddress::candidate(candidate.into()) {
                    return Ok(address);
                }
            }
        }
        Err(SyncError::unavailable(
            Self::NAME,
            format!("no candidate near gateway {} answered", gateway),
        ))
    }

    async fn reachable(&self, ip: Ipv4Addr, deadline: Instant) -> bool {
        for port in &self.ports {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            let addr = SocketAddr::from((ip, *port));
            match tokio::time::timeout(self.reach_timeout.min(left), TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => return true,
                _ => {}
            }
        }
        false
    }
}

#[async_trait]
impl ProbeStrategy for DockerHeuristic {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe(&self) -> Result<HostAddress> {
        let deadline = Instant::now() + self.budget.saturating_sub(SCAN_MARGIN);
        if let Some(address) = resolve_candidate(&self.host_name).await {
            return Ok(address);
        }
        log::debug!("{} does not resolve", self.host_name);
        self.scan_gateway_subnet(deadline).await
    }
}

/// Gateway of the default route in `/proc/net/route` format. Addresses
/// there are little-endian hex.
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (destination, gateway) = (fields.get(1)?, fields.get(2)?);
        if *destination != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(gateway, 16).ok()?;
        let ip = Ipv4Addr::from(raw.to_le_bytes());
        (!ip.is_unspecified()).then_some(ip)
    })
}

/// Hosts in the gateway's /24 with the given last octets, skipping the
/// gateway itself and the network/broadcast suffixes.
pub fn candidate_hosts(gateway: Ipv4Addr, suffixes: &[u8]) -> Vec<Ipv4Addr> {
    let [a, b, c, gw] = gateway.octets();
    suffixes
        .iter()
        .copied()
        .filter(|s| *s != gw && *s != 0 && *s != 255)
        .map(|s| Ipv4Addr::new(a, b, c, s))
        .collect()
}
