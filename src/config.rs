//! Runtime configuration: defaults, then environment, then CLI flags.

use crate::cli::get_flag;
use crate::error::{LookoutError, Result};
use crate::state::StateThresholds;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3333;

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub port: u16,
    pub bind: IpAddr,
    pub allow_remote: bool,
    pub thresholds: StateThresholds,
    pub debounce: Duration,
    pub outbox_cap: usize,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: default_root(),
            port: DEFAULT_PORT,
            bind: IpAddr::from([127, 0, 0, 1]),
            allow_remote: false,
            thresholds: StateThresholds::default(),
            debounce: Duration::from_millis(250),
            outbox_cap: 256,
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The assistant's log root: `~/.claude` unless overridden.
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

impl Config {
    /// Defaults, then `LOOKOUT_*` env vars, then `serve` flags. Later wins.
    pub fn resolve(args: &[String]) -> Result<Config> {
        let mut config = Config::default();

        if let Ok(root) = std::env::var("LOOKOUT_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Ok(port) = std::env::var("LOOKOUT_PORT") {
            config.port = parse_port(&port)?;
        }
        if let Ok(bind) = std::env::var("LOOKOUT_BIND") {
            config.bind = parse_bind(&bind)?;
        }

        if let Some(root) = get_flag(args, "--root") {
            config.root = PathBuf::from(root);
        }
        if let Some(port) = get_flag(args, "--port") {
            config.port = parse_port(&port)?;
        }
        if let Some(bind) = get_flag(args, "--bind") {
            config.bind = parse_bind(&bind)?;
        }
        config.allow_remote = args.iter().any(|a| a == "--allow-remote");

        if !config.bind.is_loopback() && !config.allow_remote {
            return Err(LookoutError::Config(format!(
                "refusing non-loopback bind {} without --allow-remote",
                config.bind
            )));
        }

        Ok(config)
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .map_err(|_| LookoutError::Config(format!("invalid port '{value}'")))
}

fn parse_bind(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .map_err(|_| LookoutError::Config(format!("invalid bind address '{value}'")))
}
