use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Child;

use crate::domain::config::{DevServerConfig, MonitorConfig};
use crate::domain::models::HostAddress;
use crate::error::{Result, SyncError};
use crate::features::monitor::hooks::shell;
use crate::features::monitor::pid_file::{read_pid, remove_pid_file, write_pid};
use crate::features::monitor::process;

const HOOK: &str = "dev-server";

/// Long-lived dev server supervised through its PID file. Output goes to
/// the configured log file.
pub struct DevServer {
    config: DevServerConfig,
    grace: Duration,
    child: Option<Child>,
}

impl DevServer {
    pub fn new(config: DevServerConfig, grace: Duration) -> Self {
        Self {
            config,
            grace,
            child: None,
        }
    }

    /// PID of the running dev server, whether spawned by us or a previous run.
    pub fn running_pid(&mut self) -> Option<u32> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return child.id(),
                Ok(Some(status)) => {
                    log::warn!("Dev server exited with {}", status);
                    self.child = None;
                }
                Err(e) => log::warn!("Cannot poll dev server: {}", e),
            }
        }
        read_pid(&self.config.pid_file)
            .filter(|pid| process::is_alive(*pid))
            .and_then(|pid| u32::try_from(pid).ok())
    }

    pub async fn restart(&mut self, address: &HostAddress) -> Result<u32> {
        self.stop().await;
        self.launch(address)
    }

    /// Relaunches the dev server if it died since the last check.
    pub async fn ensure_running(&mut self, address: &HostAddress) -> Result<Option<u32>> {
        if self.running_pid().is_some() {
            return Ok(None);
        }
        log::warn!("Dev server is not running, relaunching");
        self.launch(address).map(Some)
    }

    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
                process::request_stop(pid);
            }
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(Ok(status)) => log::info!("Dev server stopped ({})", status),
                Ok(Err(e)) => log::warn!("Error waiting for dev server: {}", e),
                Err(_) => {
                    log::warn!("Dev server ignored SIGTERM for {:?}, killing", self.grace);
                    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
                        process::force_stop(pid);
                    }
                    if let Err(e) = child.kill().await {
                        log::warn!("Error killing dev server: {}", e);
                    }
                }
            }
        } else if let Some(pid) = read_pid(&self.config.pid_file) {
            if !process::terminate(pid, self.grace).await {
                log::warn!("Dev server PID {} did not exit", pid);
            }
        }
        remove_pid_file(&self.config.pid_file);
    }

    fn launch(&mut self, address: &HostAddress) -> Result<u32> {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_file)
            .map_err(|e| SyncError::io(&self.config.log_file, e))?;
        let stderr = log_file
            .try_clone()
            .map_err(|e| SyncError::io(&self.config.log_file, e))?;

        let mut cmd = shell(&self.config.command);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.env(MonitorConfig::ENV_HOST_IP, address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| SyncError::HookFailure {
            hook: HOOK,
            details: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| SyncError::HookFailure {
            hook: HOOK,
            details: "exited before reporting a PID".to_string(),
        })?;
        write_pid(&self.config.pid_file, pid)?;
        log::info!(
            "Dev server started with PID {}, logging to {}",
            pid,
            self.config.log_file.display()
        );
        self.child = Some(child);
        Ok(pid)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn server(dir: &Path, command: &str) -> DevServer {
        DevServer::new(
            DevServerConfig {
                command: command.to_string(),
                working_dir: Some(dir.to_path_buf()),
                pid_file: dir.join("dev.pid"),
                log_file: dir.join("dev.log"),
            },
            Duration::from_secs(2),
        )
    }

    fn addr() -> HostAddress {
        "192.168.1.9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_restart_replaces_process_and_pid_file() {
        let dir = TempDir::new().unwrap();
        let mut dev = server(dir.path(), "echo \"serving on $HOST_IP\"; exec sleep 30");

        let first = dev.restart(&addr()).await.unwrap();
        assert_eq!(read_pid(&dir.path().join("dev.pid")), i32::try_from(first).ok());
        assert_eq!(dev.running_pid(), Some(first));

        let second = dev.restart(&addr()).await.unwrap();
        assert_ne!(first, second);
        assert!(!process::is_alive(i32::try_from(first).unwrap()));
        assert_eq!(read_pid(&dir.path().join("dev.pid")), i32::try_from(second).ok());

        dev.stop().await;
        assert!(!dir.path().join("dev.pid").exists());
        let log = std::fs::read_to_string(dir.path().join("dev.log")).unwrap();
        assert!(log.contains("serving on 192.168.1.9"));
    }

    #[tokio::test]
    async fn test_stop_kills_server_ignoring_sigterm() {
        let dir = TempDir::new().unwrap();
        let mut dev = server(dir.path(), "trap '' TERM; sleep 30");
        dev.grace = Duration::from_millis(300);

        let pid = dev.restart(&addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        dev.stop().await;

        assert!(!process::is_alive(i32::try_from(pid).unwrap()));
        assert!(!dir.path().join("dev.pid").exists());
    }

    #[tokio::test]
    async fn test_ensure_running_relaunches_dead_server() {
        let dir = TempDir::new().unwrap();
        let mut dev = server(dir.path(), "exit 0");

        dev.restart(&addr()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(dev.running_pid(), None);

        let relaunched = dev.ensure_running(&addr()).await.unwrap();
        assert!(relaunched.is_some());
        dev.stop().await;
    }

    #[tokio::test]
    async fn test_ensure_running_leaves_live_server_alone() {
        let dir = TempDir::new().unwrap();
        let mut dev = server(dir.path(), "exec sleep 30");
        dev.restart(&addr()).await.unwrap();
        assert_eq!(dev.ensure_running(&addr()).await.unwrap(), None);
        dev.stop().await;
    }
}
