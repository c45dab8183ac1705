//! Configuration management for the mCSD update client.
//!
//! Layered loading: built-in defaults, then an optional YAML file at
//! `config/mcsd.yml`, then `MCSD__`-prefixed environment variables
//! (`MCSD__SERVER__PORT=8081`).

use std::collections::BTreeMap;
use std::net::SocketAddr;

use fhir_client::OAuth2Config;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub mcsd: McsdConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter; overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McsdConfig {
    /// Configured root (discoverable) directories, keyed by a logical name.
    #[serde(default)]
    pub administration_directories: BTreeMap<String, DirectoryConfig>,
    /// The query directory receiving the consolidated transactions. It must
    /// support `_source` as a search parameter for conditional PUT/DELETE.
    pub query_directory: DirectoryConfig,
    /// Base URLs never allowed to register, not even via discovery.
    #[serde(default)]
    pub exclude_admin_directories: Vec<String>,
    /// Resource-type whitelist for discovered provider directories.
    #[serde(default = "mcsd_sync::default_directory_resource_types")]
    pub directory_resource_types: Vec<String>,
    /// Path of the sync-state JSON file; empty disables persistence.
    #[serde(default)]
    pub state_file: String,
    /// Enables initial-snapshot sync and the 410 Gone fallback.
    #[serde(default)]
    pub snapshot_mode_support: bool,
    /// OAuth2 client-credentials settings for outbound FHIR requests.
    #[serde(default)]
    pub auth: OAuth2Config,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub fhir_base_url: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .set_default("mcsd.query_directory.fhir_base_url", "")?
            .set_default("mcsd.state_file", "")?
            .set_default("mcsd.snapshot_mode_support", false)?
            .add_source(config::File::with_name("config/mcsd").required(false))
            .add_source(
                config::Environment::with_prefix("MCSD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Reject configurations the engine cannot start with.
    pub fn validate(&self) -> Result<(), String> {
        if self.mcsd.query_directory.fhir_base_url.is_empty() {
            return Err("mcsd.query_directory.fhir_base_url is required".to_string());
        }
        validate_fhir_url(&self.mcsd.query_directory.fhir_base_url)?;
        for (name, directory) in &self.mcsd.administration_directories {
            validate_fhir_url(&directory.fhir_base_url)
                .map_err(|e| format!("administration directory '{name}': {e}"))?;
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))
    }
}

fn validate_fhir_url(raw: &str) -> Result<(), String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid FHIR base URL ({raw}): {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(format!("invalid FHIR base URL ({raw}): expected absolute http(s) URL"));
    }
    Ok(())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}
