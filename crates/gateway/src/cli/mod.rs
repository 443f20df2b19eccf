pub mod config;
pub mod doctor;
pub mod pid;
pub mod status;

use clap::{Parser, Subcommand};

/// callrelay: supervised call relay and call dispatch gateway.
#[derive(Debug, Parser)]
#[command(name = "callrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control API and supervise the relay (default when no subcommand is given).
    Serve,
    /// Run the relay HTTP server in the foreground. Normally launched by `serve`.
    Relay,
    /// Print the relay's health and call metrics.
    Status,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults and environment overrides) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CALLRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "callrelay.toml";

/// Load the configuration from the path specified by `CALLRELAY_CONFIG`
/// (or `callrelay.toml` by default), then apply environment overrides.
/// Returns the resolved [`Config`] and the path that was used.
///
/// A missing file is not an error; defaults are used.
pub fn load_config() -> anyhow::Result<(cr_domain::config::Config, String)> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = read_config_file(std::path::Path::new(&config_path))?;
    config.apply_process_env();
    Ok((config, config_path))
}

/// Parse a TOML config file, or return defaults when it does not exist.
pub fn read_config_file(path: &std::path::Path) -> anyhow::Result<cr_domain::config::Config> {
    if !path.exists() {
        return Ok(cr_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}
