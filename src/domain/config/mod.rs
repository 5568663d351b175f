pub mod monitor_config;

pub use monitor_config::{DevServerConfig, HookCommand, HooksConfig, MonitorConfig, ProbeConfig};
