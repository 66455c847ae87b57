use anyhow::{Context, Result};
use clap::Parser;
use lib_telemetry::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "telemetry_client.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Resilient real-time telemetry client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_URL", help = "Upstream WebSocket URL (ws:// or wss://).")]
    pub url: Option<String>,

    #[clap(long, env = "TELEMETRY_AUTH_TOKEN", help = "Bearer token sent with the upgrade request.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_CLIENT_CONFIG", help = "Path to the JSON client tuning file (reconnect, cache, window, thresholds).")]
    pub client_config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (off, trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TELEMETRY_LOG_KEEP", help = "How many log files from earlier runs to keep.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "TELEMETRY_ENTITIES", value_delimiter = ',', help = "Comma-separated entity ids to subscribe to.")]
    pub entities: Option<Vec<String>>,

    #[clap(long, env = "TELEMETRY_STATUS_INTERVAL_SECONDS", help = "Seconds between status and performance summaries in the log.")]
    pub status_interval_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            url: other.url.or(self.url),
            auth_token: other.auth_token.or(self.auth_token),
            config_path: other.config_path.or(self.config_path),
            client_config_path: other.client_config_path.or(self.client_config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep: other.log_keep.or(self.log_keep),
            entities: other.entities.or(self.entities),
            status_interval_seconds: other.status_interval_seconds.or(self.status_interval_seconds),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    /// Parsed log level; unknown names fall back to `info`.
    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn log_keep(&self) -> usize {
        self.log_keep.unwrap_or(1)
    }

    pub fn entities(&self) -> &[String] {
        self.entities.as_deref().unwrap_or_default()
    }

    /// Loads the client tuning file, or the library defaults when there is none.
    ///
    /// An explicitly configured file must exist and parse.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let path = match &self.client_config_path {
            Some(path) => path.clone(),
            None => match default_client_config_path().filter(|path| path.exists()) {
                Some(path) => path,
                None => return Ok(ClientConfig::default()),
            },
        };
        read_client_config(&path)
    }
}

fn default_client_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("telemetry_client").join("client.json"))
}

fn read_client_config(path: &Path) -> Result<ClientConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read client config {}", path.display()))?;
    let config = ClientConfig::from_json_str(&raw)
        .with_context(|| format!("Invalid client config {}", path.display()))?;
    log::info!("Loaded client config from {}", path.display());
    Ok(config)
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}

/// Layers defaults, the config file and CLI/env values, in that order.
pub fn resolve(cli_args: Config) -> Config {
    // 1. Load defaults
    let default_config = Config {
        url: Some("ws://127.0.0.1:8080/telemetry".to_string()),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        log_keep: Some(1),
        status_interval_seconds: Some(30),
        ..Default::default()
    };

    // 2. Load from config file (telemetry_client.conf) if present.
    //    The CLI may point at a different file.
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = default_config;

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. CLI arguments (clap already folded in the environment) win.
    current_config.merge(cli_args)
}
