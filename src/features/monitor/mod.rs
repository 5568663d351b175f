pub mod dev_server;
pub mod hooks;
pub mod monitor_service;
pub mod pid_file;
pub mod process;
pub mod reconciler;
