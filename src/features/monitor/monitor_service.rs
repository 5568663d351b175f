use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::config::MonitorConfig;
use crate::domain::models::{HostAddress, MonitorPhase, MonitorState, MonitorStatus};
use crate::error::Result;
use crate::features::monitor::pid_file::PidFile;
use crate::features::monitor::reconciler::{HostReconciler, Reconciler};
use crate::features::probe::probe_service::ProbeService;
use crate::status_server;
use crate::utils::get_hostname;

#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn current(&self) -> HostAddress;
}

#[async_trait]
impl AddressSource for ProbeService {
    async fn current(&self) -> HostAddress {
        self.probe().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Reconciled(HostAddress),
    Unchanged,
    Failed,
}

/// Polls the address and reconciles on the first probe and on every change.
///
/// A failed reconciliation leaves `last_known` untouched so the next tick
/// tries again.
pub struct ChangeMonitor<S, R> {
    source: S,
    reconciler: R,
    state: MonitorState,
    state_file: Option<PathBuf>,
    status: Option<watch::Sender<MonitorStatus>>,
    hostname: String,
}

impl<S: AddressSource, R: Reconciler> ChangeMonitor<S, R> {
    pub fn new(source: S, reconciler: R, state: MonitorState) -> Self {
        Self {
            source,
            reconciler,
            state,
            state_file: None,
            status: None,
            hostname: get_hostname(),
        }
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    pub fn with_status(mut self, status: watch::Sender<MonitorStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let probed = self.source.current().await;
        if probed.is_fallback() {
            log::warn!("No usable host address found, advertising {}", probed);
        }

        if !self.state.needs_reconcile(&probed) {
            self.supervise(&probed).await;
            return TickOutcome::Unchanged;
        }

        match (self.state.phase(), self.state.last_known) {
            (MonitorPhase::Steady, Some(previous)) => {
                log::info!("Host address changed: {} -> {}", previous, probed)
            }
            _ => log::info!("Initial reconciliation for {}", probed),
        }

        let outcome = match self.reconciler.reconcile(&probed).await {
            Ok(report) => {
                log::info!(
                    "Reconciled {} ({} config entries changed)",
                    probed,
                    report.config.changed
                );
                self.state.record_success(probed, report.dev_server_pid);
                self.persist();
                TickOutcome::Reconciled(probed)
            }
            Err(e) => {
                log::error!("Reconciliation for {} failed, retrying next tick: {}", probed, e);
                self.state.record_failure();
                TickOutcome::Failed
            }
        };
        self.publish();
        outcome
    }

    /// Ticks every `interval` until `shutdown` resolves. A tick still in
    /// flight when `shutdown` resolves is dropped, which kills any hook it
    /// was running.
    pub async fn run_until<F>(mut self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::warn!("Shutdown requested mid-tick, abandoning it");
                    break;
                }
                outcome = self.tick() => {
                    if let TickOutcome::Reconciled(address) = outcome {
                        log::debug!("Now advertising {}", address);
                    }
                }
            }
        }

        log::info!(
            "Shutting down monitor after {} reconciliations",
            self.state().reconciliations
        );
        self.reconciler.shutdown().await;
    }

    async fn supervise(&mut self, address: &HostAddress) {
        match self.reconciler.supervise(address).await {
            Ok(Some(pid)) => {
                self.state.dev_server_pid = Some(pid);
                self.publish();
            }
            Ok(None) => {}
            Err(e) => log::error!("Dev server supervision failed: {}", e),
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.state_file {
            if let Err(e) = self.state.persist_last_known(path) {
                log::warn!("{}", e);
            }
        }
    }

    fn publish(&self) {
        if let Some(status) = &self.status {
            status.send_replace(MonitorStatus::from_state(&self.state, self.hostname.clone()));
        }
    }
}

/// Runs the monitor in the foreground until `shutdown` resolves.
///
/// Fails with `AlreadyRunning` before doing anything else if another live
/// monitor owns the PID file.
pub async fn run<F>(config: &MonitorConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let pid_file = PidFile::acquire(&config.pid_file)?;

    let mut state = MonitorState::new(std::process::id());
    state.last_known = MonitorState::load_last_known(&config.state_file);
    if let Some(address) = state.last_known {
        log::info!("Last known host address {} from {}", address, config.state_file.display());
    }

    let hostname = get_hostname();
    let (status_tx, status_rx) = watch::channel(MonitorStatus::from_state(&state, hostname));
    if let Some(port) = config.status_port() {
        spawn_status_server(port, status_rx);
    }

    log::info!(
        "Monitoring host address every {:?} (PID {})",
        config.interval(),
        std::process::id()
    );
    ChangeMonitor::new(ProbeService::new(&config.probe), HostReconciler::new(config), state)
        .with_state_file(config.state_file.clone())
        .with_status(status_tx)
        .run_until(config.interval(), shutdown)
        .await;

    log::info!("Releasing {}", pid_file.path().display());
    drop(pid_file);
    Ok(())
}

fn spawn_status_server(port: u16, status: watch::Receiver<MonitorStatus>) {
    tokio::spawn(async move {
        if let Err(e) = status_server::run(port, status).await {
            log::error!("Status server error: {}", e);
        }
    });
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Interrupt received"),
        _ = terminate => log::info!("Terminate signal received"),
    }
}
