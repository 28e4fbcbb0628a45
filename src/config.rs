use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// Optional configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "crowd_chess.json";
/// Environment variables such as `CROWD_CHESS_BACKEND_URI` override the file
pub const ENV_PREFIX: &str = "CROWD_CHESS";

fn default_backend_uri() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_highlight_store_path() -> String {
    "highlighted_squares.json".to_string()
}

fn default_vote_poll_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    /// Base address of the game backend
    #[serde(default = "default_backend_uri")]
    pub backend_uri: String,
    /// Address of the local presentation bridge
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_highlight_store_path")]
    pub highlight_store_path: String,
    /// Whether votes must carry a human-verification token
    #[serde(default)]
    pub require_verification: bool,
    #[serde(default = "default_vote_poll_interval_secs")]
    pub vote_poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn new() -> Result<AppConfig, ConfigError> {
        Self::load(DEFAULT_CONFIG_FILE, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load(config_file: &str, environment: Environment) -> Result<AppConfig, ConfigError> {
        let builder = Config::builder()
            .add_source(File::new(config_file, FileFormat::Json).required(false))
            .add_source(environment);

        let s = builder.build()?;
        let cfg: AppConfig = s.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vote_poll_interval_secs == 0 {
            return Err(ConfigError::Message("vote_poll_interval_secs must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Message("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn vote_poll_interval(&self) -> Duration {
        Duration::from_secs(self.vote_poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
