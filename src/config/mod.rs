//! Configuration module

pub mod cli;
pub mod sentinel_config;

pub use cli::CliArgs;
pub use sentinel_config::{AuthConfig, Role, SentinelOptions, ServerAddress};
