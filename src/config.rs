use std::env;
use std::net::SocketAddr;

use crate::error::AppError;

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: SocketAddr,

    /// Redis server host
    pub redis_host: String,

    /// Redis server port
    pub redis_port: u16,

    /// Optional Redis password
    pub redis_password: Option<String>,

    /// In-memory store cleanup interval in seconds
    pub cleanup_interval_secs: u64,

    /// Default log level when RUST_LOG is not set
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("invalid BIND_ADDR: {e}")))?;

        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());

        let redis_port = env::var("REDIS_PORT")
            .unwrap_or_else(|_| "6379".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("invalid REDIS_PORT: {e}")))?;

        let redis_password = env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty());

        let cleanup_interval_secs = env::var("CLEANUP_INTERVAL")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("invalid CLEANUP_INTERVAL: {e}")))?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            bind_addr,
            redis_host,
            redis_port,
            redis_password,
            cleanup_interval_secs,
            log_level,
        })
    }

    /// Connection URL for the Redis client
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => {
                format!("redis://:{}@{}:{}", password, self.redis_host, self.redis_port)
            }
            None => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            cleanup_interval_secs: 300,
            log_level: "info".to_string(),
        }
    }
}
