pub mod config_writer;
pub mod monitor;
pub mod probe;
