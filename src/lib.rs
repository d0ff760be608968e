pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod init;
pub mod logger;
pub mod relay;
pub mod stats;
