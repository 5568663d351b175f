pub mod config_writer_service;
