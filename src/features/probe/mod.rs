pub mod docker;
pub mod probe_service;
pub mod strategies;
