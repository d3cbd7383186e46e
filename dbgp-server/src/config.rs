//! Server configuration
//!
//! Command-line flags (with environment fallbacks) override an optional TOML
//! file, which overrides the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dbgp_core::Dialect;
use serde::Deserialize;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9005;
const DEFAULT_MAX_DEPTH: u32 = 2;
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on for the engine connection
    #[arg(long, env = "DBGP_HOST")]
    pub host: Option<String>,

    /// Port to listen on for the engine connection (default: 9005)
    #[arg(long, env = "DBGP_PORT")]
    pub port: Option<u16>,

    /// TOML configuration file
    #[arg(long, env = "DBGP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Force the expression dialect (v1 or v2) instead of detecting it
    #[arg(long, env = "DBGP_DIALECT")]
    pub dialect: Option<Dialect>,

    /// Report every engine break without checking conditions or log points
    #[arg(long)]
    pub no_advanced_breakpoints: bool,

    /// Object nesting depth fetched by `eval` (default: 2)
    #[arg(long, env = "DBGP_MAX_DEPTH")]
    pub max_depth: Option<u32>,

    /// Seconds to wait for the engine's init packet (default: 10)
    #[arg(long, env = "DBGP_INIT_TIMEOUT_SECS")]
    pub init_timeout_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset (default: info)
    #[arg(long, env = "DBGP_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Contents of the TOML configuration file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dialect: Option<Dialect>,
    pub advanced_breakpoints: Option<bool>,
    pub max_depth: Option<u32>,
    pub init_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dialect: Option<Dialect>,
    pub advanced_breakpoints: bool,
    pub max_depth: u32,
    pub init_timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Read the file named by `--config`, if any, and merge.
    pub fn load(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    pub fn merge(cli: Cli, file: FileConfig) -> Self {
        Self {
            host: cli
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            dialect: cli.dialect.or(file.dialect),
            advanced_breakpoints: !cli.no_advanced_breakpoints
                && file.advanced_breakpoints.unwrap_or(true),
            max_depth: cli.max_depth.or(file.max_depth).unwrap_or(DEFAULT_MAX_DEPTH),
            init_timeout: Duration::from_secs(
                cli.init_timeout_secs
                    .or(file.init_timeout_secs)
                    .unwrap_or(DEFAULT_INIT_TIMEOUT_SECS),
            ),
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::merge(Cli::default(), FileConfig::default());
        assert_eq!(config.listen_addr(), "127.0.0.1:9005");
        assert_eq!(config.dialect, None);
        assert!(config.advanced_breakpoints);
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.init_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::parse(
            r#"
            host = "0.0.0.0"
            port = 9000
            dialect = "v1"
            max-depth = 4
            "#,
        )
        .unwrap();
        let cli = Cli::parse_from(["dbgp-server", "--port", "9100", "--dialect", "v2"]);

        let config = Config::merge(cli, file);
        assert_eq!(config.listen_addr(), "0.0.0.0:9100");
        assert_eq!(config.dialect, Some(Dialect::V2));
        assert_eq!(config.max_depth, 4);
    }

    #[test]
    fn test_advanced_breakpoints_can_be_disabled_either_way() {
        let file = FileConfig::parse("advanced-breakpoints = false").unwrap();
        assert!(!Config::merge(Cli::default(), file).advanced_breakpoints);

        let cli = Cli::parse_from(["dbgp-server", "--no-advanced-breakpoints"]);
        assert!(!Config::merge(cli, FileConfig::default()).advanced_breakpoints);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::parse("colour = true").is_err());
    }
}
