pub mod config_entry;
pub mod host_address;
pub mod monitor_state;

pub use config_entry::{ConfigEntry, EntryTemplate};
pub use host_address::HostAddress;
pub use monitor_state::{MonitorPhase, MonitorState, MonitorStatus};
