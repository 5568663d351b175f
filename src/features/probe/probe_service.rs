use std::fmt;
use std::time::Duration;

use crate::domain::config::ProbeConfig;
use crate::domain::models::HostAddress;
use crate::error::SyncError;
use crate::features::probe::docker::DockerHeuristic;
use crate::features::probe::strategies::{
    DefaultRoute, EnvOverride, HostnameCommand, InterfaceScan, ProbeStrategy,
};

pub const FALLBACK_SOURCE: &str = "fallback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Found(HostAddress),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub strategy: &'static str,
    pub outcome: AttemptOutcome,
}

/// Result of one probe run with every strategy that was tried.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub address: HostAddress,
    pub source: &'static str,
    pub attempts: Vec<ProbeAttempt>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for attempt in &self.attempts {
            match &attempt.outcome {
                AttemptOutcome::Found(address) => writeln!(f, "  {:<18} {}", attempt.strategy, address)?,
                AttemptOutcome::Failed(reason) => {
                    writeln!(f, "  {:<18} - ({})", attempt.strategy, reason)?
                }
            }
        }
        write!(f, "selected {} via {}", self.address, self.source)
    }
}

/// Runs the probe strategies in priority order. Never fails: when every
/// strategy comes up empty the loopback fallback is returned.
pub struct ProbeService {
    strategies: Vec<Box<dyn ProbeStrategy>>,
    timeout: Duration,
}

impl ProbeService {
    pub fn new(config: &ProbeConfig) -> Self {
        let strategies: Vec<Box<dyn ProbeStrategy>> = vec![
            Box::new(HostnameCommand),
            Box::new(DefaultRoute::new(config.route_target.clone())),
            Box::new(InterfaceScan),
            Box::new(DockerHeuristic::new(config)),
            Box::new(EnvOverride::from_env()),
        ];
        Self::with_strategies(strategies, config.timeout())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ProbeStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
        }
    }

    pub async fn probe(&self) -> HostAddress {
        self.probe_detailed().await.address
    }

    pub async fn probe_detailed(&self) -> ProbeReport {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let result = match tokio::time::timeout(self.timeout, strategy.probe()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::ProbeTimeout {
                    strategy: strategy.name(),
                    timeout: self.timeout,
                }),
            };

            match result {
                Ok(address) => {
                    log::debug!("Probe {} -> {}", strategy.name(), address);
                    attempts.push(ProbeAttempt {
                        strategy: strategy.name(),
                        outcome: AttemptOutcome::Found(address),
                    });
                    return ProbeReport {
                        address,
                        source: strategy.name(),
                        attempts,
                    };
                }
                Err(e) => {
                    log::debug!("Probe {} failed: {}", strategy.name(), e);
                    attempts.push(ProbeAttempt {
                        strategy: strategy.name(),
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        log::warn!("{}, using {}", SyncError::ProbeExhausted, HostAddress::FALLBACK);
        ProbeReport {
            address: HostAddress::FALLBACK,
            source: FALLBACK_SOURCE,
            attempts,
        }
    }
}
