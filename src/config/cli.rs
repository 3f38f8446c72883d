//! Command-line argument parsing
//!
//! Arguments are grouped by category. Anything after the options is sent
//! as a single command through the sentinel-resolved connection.

use std::time::Duration;

use clap::Parser;

use super::sentinel_config::{AuthConfig, Role, SentinelOptions, ServerAddress};
use crate::sentinel::{default_retry_strategy, PreferredReplica, PreferredReplicas, SentinelEndpoint};

/// Sentinel-aware command-line client for Valkey
#[derive(Parser, Debug, Clone)]
#[command(name = "valkey-sentinel-cli")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
#[command(trailing_var_arg = true)]
pub struct CliArgs {
    /// Print help information
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: (),

    /// Command to run (interactive mode when omitted)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command_args: Vec<String>,

    // ===== Sentinel Options =====
    /// Sentinel address as host[:port] (repeatable, tried in order)
    #[arg(short = 's', long = "sentinel", default_value = "127.0.0.1:26379", action = clap::ArgAction::Append)]
    pub sentinels: Vec<String>,

    /// Master name monitored by the sentinels
    #[arg(short = 'n', long = "name", default_value = "mymaster")]
    pub name: String,

    /// Role of the node to connect to (master or replica)
    #[arg(long = "role", default_value = "master")]
    pub role: String,

    /// Password for AUTH against sentinels
    #[arg(long = "sentinel-password")]
    pub sentinel_password: Option<String>,

    /// Username for sentinel ACL AUTH (requires --sentinel-password)
    #[arg(long = "sentinel-user")]
    pub sentinel_username: Option<String>,

    /// Do not add sentinels discovered through SENTINEL sentinels
    #[arg(long = "no-update-sentinels")]
    pub no_update_sentinels: bool,

    /// Preferred replica as ip:port[:priority] (repeatable, replica role only)
    #[arg(long = "prefer", action = clap::ArgAction::Append)]
    pub preferred: Vec<String>,

    /// Address translation as from_host:port=to_host:port (repeatable)
    #[arg(long = "nat-map", action = clap::ArgAction::Append)]
    pub nat_map: Vec<String>,

    // ===== Node Options =====
    /// Password for AUTH against the data node
    #[arg(short = 'a', long = "auth")]
    pub password: Option<String>,

    /// Username for ACL AUTH (requires --auth)
    #[arg(long = "user")]
    pub username: Option<String>,

    // ===== Retry Options =====
    /// Fail as soon as every sentinel has been tried once
    #[arg(long = "no-retry")]
    pub no_retry: bool,

    /// Give up after this many failed passes over the sentinels (0 = never)
    #[arg(long = "max-retries", default_value_t = 0)]
    pub max_retries: u32,

    // ===== Timing Options =====
    /// Connection timeout in milliseconds
    #[arg(long = "connect-timeout", default_value_t = 10000)]
    pub connect_timeout_ms: u64,

    /// Request timeout in milliseconds (0 = none)
    #[arg(long = "request-timeout", default_value_t = 0)]
    pub request_timeout_ms: u64,

    // ===== Mode Options =====
    /// Resolve on the first command instead of at startup
    #[arg(long = "lazy")]
    pub lazy: bool,

    /// Print client events until interrupted
    #[arg(long = "watch")]
    pub watch: bool,

    // ===== Output Options =====
    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_some() && self.password.is_none() {
            return Err("--user requires --auth to be set".to_string());
        }

        if self.sentinel_username.is_some() && self.sentinel_password.is_none() {
            return Err("--sentinel-user requires --sentinel-password to be set".to_string());
        }

        let role: Role = self.role.parse().map_err(|e| format!("--role: {}", e))?;
        if !self.preferred.is_empty() && role != Role::Replica {
            return Err("--prefer requires --role replica".to_string());
        }

        if self.no_retry && self.max_retries > 0 {
            return Err("--no-retry and --max-retries are mutually exclusive".to_string());
        }

        if self.watch && !self.command_args.is_empty() {
            return Err("--watch does not take a command".to_string());
        }

        if self.connect_timeout_ms == 0 {
            return Err("--connect-timeout must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Build client options from the parsed arguments
    pub fn to_options(&self) -> Result<SentinelOptions, String> {
        self.validate()?;

        let sentinels = self
            .sentinels
            .iter()
            .map(|s| s.parse::<SentinelEndpoint>().map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;

        let role: Role = self.role.parse().map_err(|e| format!("--role: {}", e))?;

        let mut options = SentinelOptions::new(sentinels, self.name.clone())
            .with_role(role)
            .with_update_sentinels(!self.no_update_sentinels)
            .with_lazy_connect(self.lazy)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));

        if self.request_timeout_ms > 0 {
            options = options.with_command_timeout(Duration::from_millis(self.request_timeout_ms));
        }

        if let Some(ref password) = self.sentinel_password {
            let mut auth = AuthConfig::new(password.clone());
            auth.username = self.sentinel_username.clone();
            options = options.with_sentinel_auth(auth);
        }

        if let Some(ref password) = self.password {
            let mut auth = AuthConfig::new(password.clone());
            auth.username = self.username.clone();
            options = options.with_node_auth(auth);
        }

        if !self.no_retry {
            let max_retries = self.max_retries;
            options = options.with_retry_strategy(move |attempt: u32| {
                if max_retries > 0 && attempt > max_retries {
                    None
                } else {
                    default_retry_strategy(attempt)
                }
            });
        }

        if !self.preferred.is_empty() {
            let list = self
                .preferred
                .iter()
                .map(|p| parse_preferred(p))
                .collect::<Result<Vec<_>, _>>()?;
            options = options.with_preferred_replicas(PreferredReplicas::Priority(list));
        }

        for mapping in &self.nat_map {
            let (from, to) = mapping
                .split_once('=')
                .ok_or_else(|| format!("--nat-map expects from=to, got '{}'", mapping))?;
            let from: ServerAddress = from.parse().map_err(|e| format!("--nat-map: {}", e))?;
            let to: ServerAddress = to.parse().map_err(|e| format!("--nat-map: {}", e))?;
            options = options.with_nat_mapping(from, to);
        }

        options.validate().map_err(|e| e.to_string())?;
        Ok(options)
    }
}

/// Parse `ip:port[:priority]`
fn parse_preferred(s: &str) -> Result<PreferredReplica, String> {
    let invalid = || format!("--prefer expects ip:port[:priority], got '{}'", s);
    let parts: Vec<&str> = s.split(':').collect();
    let (ip, port, priority) = match parts.as_slice() {
        [ip, port] => (*ip, *port, None),
        [ip, port, priority] => (*ip, *port, Some(*priority)),
        _ => return Err(invalid()),
    };
    if ip.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let priority = match priority {
        Some(p) => Some(p.parse::<u32>().map_err(|_| invalid())?),
        None => None,
    };
    Ok(PreferredReplica::new(ip, port, priority))
}
