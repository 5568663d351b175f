use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::domain::config::MonitorConfig;
use crate::domain::models::{HostAddress, MonitorState};
use crate::error::SyncError;
use crate::features::monitor::monitor_service::{self, shutdown_signal};
use crate::features::monitor::pid_file::{read_pid, remove_pid_file};
use crate::features::monitor::process;
use crate::features::probe::probe_service::ProbeService;

const STARTUP_CHECK_DELAY_MS: u64 = 500;

/// Keeps .env files and dependent services pointed at the host's LAN address.
#[derive(Parser, Debug)]
#[command(name = "host-ip-sync", version, about)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the change monitor (detached unless --foreground).
    Start {
        #[arg(long)]
        foreground: bool,
    },
    /// Stop a running monitor.
    Stop,
    /// Stop, then start the monitor detached.
    Restart,
    /// Show whether the monitor runs and the last reconciled address.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print the detected host address.
    Probe {
        /// Show every strategy that was tried.
        #[arg(long)]
        debug: bool,
    },
}

impl Cli {
    pub fn wants_debug_logging(&self) -> bool {
        matches!(self.command, Command::Probe { debug: true })
    }
}

#[derive(Serialize, Debug)]
struct StatusReport {
    running: bool,
    monitor_pid: Option<i32>,
    host_ip: Option<HostAddress>,
    dev_server_pid: Option<i32>,
    pid_file: PathBuf,
    state_file: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = MonitorConfig::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    match cli.command {
        Command::Start { foreground: true } => {
            monitor_service::run(&config, shutdown_signal()).await?;
        }
        Command::Start { foreground: false } => start_detached(&config, cli.config.as_deref()).await?,
        Command::Stop => stop(&config).await?,
        Command::Restart => {
            stop(&config).await?;
            start_detached(&config, cli.config.as_deref()).await?;
        }
        Command::Status { json } => status(&config, json)?,
        Command::Probe { debug } => probe(&config, debug).await,
    }
    Ok(())
}

async fn start_detached(config: &MonitorConfig, config_path: Option<&Path>) -> Result<()> {
    if let Some(pid) = read_pid(&config.pid_file).filter(|pid| process::is_alive(*pid)) {
        return Err(SyncError::AlreadyRunning {
            pid,
            path: config.pid_file.clone(),
        }
        .into());
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("opening {}", config.log_file.display()))?;
    let stderr = log_file.try_clone()?;

    let exe = std::env::current_exe().context("locating own executable")?;
    let mut cmd = tokio::process::Command::new(exe);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    cmd.args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr));
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().context("spawning monitor")?;
    let pid = child.id().unwrap_or_default();

    tokio::time::sleep(Duration::from_millis(STARTUP_CHECK_DELAY_MS)).await;
    if let Some(exit) = child.try_wait()? {
        anyhow::bail!(
            "monitor exited during startup ({}), see {}",
            exit,
            config.log_file.display()
        );
    }

    println!(
        "host-ip-sync started (PID {}), logging to {}",
        pid,
        config.log_file.display()
    );
    Ok(())
}

async fn stop(config: &MonitorConfig) -> Result<()> {
    let grace = Duration::from_millis(MonitorConfig::STOP_GRACE_MS);

    match read_pid(&config.pid_file) {
        None => println!("host-ip-sync is not running"),
        Some(pid) if !process::is_alive(pid) => {
            println!("Removing stale pid file for PID {}", pid);
            remove_pid_file(&config.pid_file);
        }
        Some(pid) => {
            if !process::terminate(pid, grace).await {
                anyhow::bail!("monitor PID {} did not stop", pid);
            }
            remove_pid_file(&config.pid_file);
            println!("host-ip-sync stopped (PID {})", pid);
        }
    }

    // A killed monitor cannot stop its dev server itself.
    if let Some(dev) = &config.dev_server {
        if let Some(pid) = read_pid(&dev.pid_file) {
            if process::is_alive(pid) {
                log::warn!("Stopping orphaned dev server PID {}", pid);
                process::terminate(pid, grace).await;
            }
            remove_pid_file(&dev.pid_file);
        }
    }
    Ok(())
}

fn status(config: &MonitorConfig, json: bool) -> Result<()> {
    let monitor_pid = read_pid(&config.pid_file).filter(|pid| process::is_alive(*pid));
    let dev_server_pid = config
        .dev_server
        .as_ref()
        .and_then(|dev| read_pid(&dev.pid_file))
        .filter(|pid| process::is_alive(*pid));
    let report = StatusReport {
        running: monitor_pid.is_some(),
        monitor_pid,
        host_ip: MonitorState::load_last_known(&config.state_file),
        dev_server_pid,
        pid_file: config.pid_file.clone(),
        state_file: config.state_file.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match report.monitor_pid {
        Some(pid) => println!("host-ip-sync: running (PID {})", pid),
        None => println!("host-ip-sync: not running"),
    }
    match report.host_ip {
        Some(ip) => println!("last known IP: {}", ip),
        None => println!("last known IP: none"),
    }
    if config.dev_server.is_some() {
        match report.dev_server_pid {
            Some(pid) => println!("dev server: running (PID {})", pid),
            None => println!("dev server: not running"),
        }
    }
    Ok(())
}

async fn probe(config: &MonitorConfig, debug: bool) {
    let report = ProbeService::new(&config.probe).probe_detailed().await;
    if debug {
        eprintln!("{}", report);
    }
    println!("{}", report.address);
}
