use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::domain::config::{HookCommand, MonitorConfig};
use crate::domain::models::HostAddress;
use crate::error::{Result, SyncError};
use crate::features::monitor::process;

const STDERR_TAIL_LINES: usize = 5;

pub fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Kills a hook's whole process group when the hook is abandoned, either by
/// timing out or by the caller dropping the future.
struct GroupGuard(Option<i32>);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            log::debug!("Killing process group of abandoned hook (PID {})", pid);
            process::kill_group(pid);
        }
    }
}

/// Runs reconciliation hooks as `sh -c` commands with `HOST_IP` set, and
/// judges them by exit status only.
#[derive(Debug, Clone)]
pub struct HookRunner {
    timeout: Duration,
}

impl HookRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, hook: &'static str, command: &HookCommand, address: &HostAddress) -> Result<()> {
        let mut cmd = shell(&command.command);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.env(MonitorConfig::ENV_HOST_IP, address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        log::info!("Running {} hook: {}", hook, command.command);
        let child = cmd.spawn().map_err(|e| SyncError::HookFailure {
            hook,
            details: e.to_string(),
        })?;
        let mut group = GroupGuard(child.id().and_then(|pid| i32::try_from(pid).ok()));

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SyncError::HookFailure {
                hook,
                details: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| SyncError::HookFailure {
                hook,
                details: e.to_string(),
            })?;
        group.0 = None;

        if output.status.success() {
            log::info!("{} hook finished", hook);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ");
        Err(SyncError::HookFailure {
            hook,
            details: format!("{} {}", output.status, tail).trim_end().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hook(command: &str) -> HookCommand {
        HookCommand {
            command: command.to_string(),
            working_dir: None,
        }
    }

    fn addr() -> HostAddress {
        "10.0.0.5".parse().unwrap()
    }

    #[tokio::test]
    async fn test_successful_hook() {
        let runner = HookRunner::new(Duration::from_secs(10));
        runner.run("rebuild", &hook("true"), &addr()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_hook_reports_stderr() {
        let runner = HookRunner::new(Duration::from_secs(10));
        let err = runner
            .run("rebuild", &hook("echo 'vite: build failed' >&2; exit 3"), &addr())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("rebuild"));
        assert!(text.contains("vite: build failed"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_hook_sees_host_ip_and_working_dir() {
        let dir = TempDir::new().unwrap();
        let command = HookCommand {
            command: "echo \"$HOST_IP\" > seen.txt".to_string(),
            working_dir: Some(dir.path().to_path_buf()),
        };
        HookRunner::new(Duration::from_secs(10))
            .run("cache-clear", &command, &addr())
            .await
            .unwrap();
        let seen = std::fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen.trim(), "10.0.0.5");
    }

    #[tokio::test]
    async fn test_hook_timeout() {
        let runner = HookRunner::new(Duration::from_millis(200));
        let err = runner.run("rebuild", &hook("sleep 5"), &addr()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    /// Alive and not a zombie waiting for init to reap it.
    #[cfg(target_os = "linux")]
    fn running(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| !stat.contains(") Z "))
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..40 {
            if !running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    fn background_child_hook(dir: &TempDir) -> HookCommand {
        HookCommand {
            command: "sleep 30 & echo $! > child.pid; wait".to_string(),
            working_dir: Some(dir.path().to_path_buf()),
        }
    }

    #[cfg(target_os = "linux")]
    fn background_child_pid(dir: &TempDir) -> i32 {
        std::fs::read_to_string(dir.path().join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timed_out_hook_takes_background_children_down() {
        let dir = TempDir::new().unwrap();
        let err = HookRunner::new(Duration::from_millis(500))
            .run("rebuild", &background_child_hook(&dir), &addr())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let pid = background_child_pid(&dir);
        assert!(wait_until_gone(pid).await, "PID {} survived the timeout", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_hook_takes_background_children_down() {
        let dir = TempDir::new().unwrap();
        let runner = HookRunner::new(Duration::from_secs(600));
        let command = background_child_hook(&dir);
        let abandoned =
            tokio::time::timeout(Duration::from_millis(500), runner.run("rebuild", &command, &addr())).await;
        assert!(abandoned.is_err());

        let pid = background_child_pid(&dir);
        assert!(wait_until_gone(pid).await, "PID {} survived the cancelled hook", pid);
    }
}
