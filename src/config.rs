//! Startup configuration.
//!
//! Everything comes from the environment (a `.env` file is loaded first when
//! present) and is validated once, before the server binds. A missing or
//! malformed value stops startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub struct Config {
    pub addr: SocketAddr,
    pub build: String,
    pub request_timeout: Option<Duration>,

    pub auth_issuer: String,
    pub auth_keys_dir: PathBuf,
    /// Key id used to sign tokens this process issues.
    pub auth_active_kid: Option<String>,

    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parses configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let addr = match var("TOLLGATE_ADDR") {
            Some(v) => v.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "TOLLGATE_ADDR",
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let build = var("TOLLGATE_BUILD").unwrap_or_else(|| "develop".to_owned());

        let request_timeout = var("TOLLGATE_REQUEST_TIMEOUT_SECS")
            .map(|v| match v.parse::<u64>() {
                Ok(0) => Err(ConfigError::Invalid {
                    key: "TOLLGATE_REQUEST_TIMEOUT_SECS",
                    reason: "must be greater than zero".to_owned(),
                }),
                Ok(secs) => Ok(Duration::from_secs(secs)),
                Err(e) => Err(ConfigError::Invalid {
                    key: "TOLLGATE_REQUEST_TIMEOUT_SECS",
                    reason: e.to_string(),
                }),
            })
            .transpose()?;

        let auth_issuer = var("TOLLGATE_AUTH_ISSUER").ok_or(ConfigError::Missing("TOLLGATE_AUTH_ISSUER"))?;
        let auth_keys_dir = var("TOLLGATE_AUTH_KEYS_DIR")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("TOLLGATE_AUTH_KEYS_DIR"))?;
        let auth_active_kid = var("TOLLGATE_AUTH_ACTIVE_KID");

        let database_url = var("DATABASE_URL");

        Ok(Self {
            addr,
            build,
            request_timeout,
            auth_issuer,
            auth_keys_dir,
            auth_active_kid,
            database_url,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("build", &self.build)
            .field("request_timeout", &self.request_timeout)
            .field("auth_issuer", &self.auth_issuer)
            .field("auth_keys_dir", &self.auth_keys_dir)
            .field("auth_active_kid", &self.auth_active_kid)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
