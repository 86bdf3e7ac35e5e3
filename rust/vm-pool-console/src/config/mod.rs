//! Configuration management for the console.
//!
//! Configuration is layered: built-in defaults, then the optional
//! `config/vm-pool-console` and `config/console` files (any format the
//! `config` crate understands), then `POOL_CONSOLE__*` environment variables.
//!
//! ```rust,ignore
//! use vm_pool_console::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! ```
//!
//! Use [`ConfigValidator`] to check combinations before startup; [`AppConfig::load`]
//! does so automatically.

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};

/// Prefix of environment variables, e.g. `POOL_CONSOLE__SERVER__PORT`.
pub const ENV_PREFIX: &str = "POOL_CONSOLE";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Authentication settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration from the default locations.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_file(None)
    }

    /// Load and validate configuration, reading `file` after the default
    /// config files when given.
    pub fn load_with_file(file: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(file)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(file: Option<&str>) -> anyhow::Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("database.path", default_database_path())?
            .add_source(config::File::with_name("config/vm-pool-console").required(false))
            .add_source(config::File::with_name("config/console").required(false));

        if let Some(file) = file {
            builder = builder.add_source(config::File::with_name(file).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HS256 secret for bearer tokens. Bearer auth is off when unset.
    pub jwt_secret: Option<String>,
    /// Accept the `X-Remote-User` header set by an authenticating proxy.
    #[serde(default)]
    pub trust_remote_user: bool,
}

impl GatewayConfig {
    pub fn jwt_enabled(&self) -> bool {
        self.jwt_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
    /// User granted Super Admin on the root pool when seeding an empty database.
    pub bootstrap_admin: Option<String>,
}

fn default_database_path() -> String {
    "data/vm-pool-console.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            bootstrap_admin: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
