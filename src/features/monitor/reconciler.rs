use std::time::Duration;

use async_trait::async_trait;

use crate::domain::config::{HooksConfig, MonitorConfig};
use crate::domain::models::{ConfigEntry, EntryTemplate, HostAddress};
use crate::error::Result;
use crate::features::config_writer::config_writer_service::{BatchReport, ConfigWriter};
use crate::features::monitor::dev_server::DevServer;
use crate::features::monitor::hooks::HookRunner;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub config: BatchReport,
    pub dev_server_pid: Option<u32>,
}

/// What the monitor does when the address changes.
#[async_trait]
pub trait Reconciler: Send {
    async fn reconcile(&mut self, address: &HostAddress) -> Result<ReconcileReport>;

    /// Called on ticks without an address change. Returns a new dev server
    /// PID if one had to be relaunched.
    async fn supervise(&mut self, _address: &HostAddress) -> Result<Option<u32>> {
        Ok(None)
    }

    async fn shutdown(&mut self) {}
}

/// Writes the config entries, then runs the cache-clear and rebuild hooks,
/// then restarts the dev server. Any hook failure stops the sequence.
pub struct HostReconciler {
    writer: ConfigWriter,
    templates: Vec<EntryTemplate>,
    hooks: HooksConfig,
    runner: HookRunner,
    dev_server: Option<DevServer>,
}

impl HostReconciler {
    pub fn new(config: &MonitorConfig) -> Self {
        let grace = Duration::from_millis(MonitorConfig::STOP_GRACE_MS);
        Self {
            writer: ConfigWriter::new(),
            templates: config.entries.clone(),
            hooks: config.hooks.clone(),
            runner: HookRunner::new(config.hooks.timeout()),
            dev_server: config
                .dev_server
                .clone()
                .map(|dev| DevServer::new(dev, grace)),
        }
    }

    pub fn entries_for(&self, address: &HostAddress) -> Vec<ConfigEntry> {
        self.templates.iter().map(|t| t.render(address)).collect()
    }
}

#[async_trait]
impl Reconciler for HostReconciler {
    async fn reconcile(&mut self, address: &HostAddress) -> Result<ReconcileReport> {
        let entries = self.entries_for(address);
        let config = self.writer.apply(&entries)?;
        log::info!(
            "Config entries: {} changed, {} unchanged, {} skipped",
            config.changed,
            config.unchanged,
            config.skipped.len()
        );
        if !config.is_clean() {
            log::warn!("Some entries were skipped and will be retried on the next change");
        }

        if let Some(hook) = &self.hooks.cache_clear {
            self.runner.run("cache-clear", hook, address).await?;
        }
        if let Some(hook) = &self.hooks.rebuild {
            self.runner.run("rebuild", hook, address).await?;
        }

        let dev_server_pid = match self.dev_server.as_mut() {
            Some(dev) => Some(dev.restart(address).await?),
            None => None,
        };

        Ok(ReconcileReport {
            config,
            dev_server_pid,
        })
    }

    async fn supervise(&mut self, address: &HostAddress) -> Result<Option<u32>> {
        match self.dev_server.as_mut() {
            Some(dev) => dev.ensure_running(address).await,
            None => Ok(None),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(dev) = self.dev_server.as_mut() {
            dev.stop().await;
        }
    }
}
