//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/leakvault";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default bind address of the agent stream listener.
pub const DEFAULT_AGENT_STREAM_ADDR: &str = "127.0.0.1:9000";

/// Frames buffered per connection between the read task and the dispatcher.
pub const DEFAULT_AGENT_STREAM_QUEUE_SIZE: usize = 256;

/// Frames handled concurrently per connection.
pub const DEFAULT_AGENT_STREAM_WORKERS: usize = 8;

/// Longest accepted frame, newline excluded.
pub const DEFAULT_AGENT_STREAM_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Platform an agent must be registered for to push combolists.
pub const DEFAULT_COMBOLIST_PLATFORM: &str = "combolist";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub stream: StreamConfig,
    pub agents: AgentConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Agent stream listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub enabled: bool,
    pub addr: String,
    pub queue_size: usize,
    pub workers: usize,
    pub max_frame_bytes: usize,
}

/// Agent gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub combolist_platform: String,
}

/// Parse `key` from the environment, or `default` when unset. A set but
/// unparsable value is an error naming the variable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            tracing::warn!(variable = key, value = %raw, "Invalid configuration value");
            anyhow::anyhow!("{} has an invalid value: {:?}", key, raw)
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("LEAKVAULT_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("LEAKVAULT_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env_or(
                    "LEAKVAULT_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS)?,
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true)?,
            },
            stream: StreamConfig {
                enabled: env_or("AGENT_STREAM_ENABLED", false)?,
                addr: std::env::var("AGENT_STREAM_ADDR")
                    .unwrap_or_else(|_| DEFAULT_AGENT_STREAM_ADDR.to_string()),
                queue_size: env_or("AGENT_STREAM_QUEUE_SIZE", DEFAULT_AGENT_STREAM_QUEUE_SIZE)?,
                workers: env_or("AGENT_STREAM_WORKERS", DEFAULT_AGENT_STREAM_WORKERS)?,
                max_frame_bytes: env_or(
                    "AGENT_STREAM_MAX_FRAME_BYTES",
                    DEFAULT_AGENT_STREAM_MAX_FRAME_BYTES,
                )?,
            },
            agents: AgentConfig {
                combolist_platform: std::env::var("COMBOLIST_PLATFORM")
                    .unwrap_or_else(|_| DEFAULT_COMBOLIST_PLATFORM.to_string()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.stream.enabled {
            self.stream
                .addr
                .parse::<SocketAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid AGENT_STREAM_ADDR '{}': {}", self.stream.addr, e))?;
            if self.stream.queue_size == 0 || self.stream.workers == 0 {
                anyhow::bail!("Agent stream queue size and worker count must be greater than 0");
            }
            if self.stream.max_frame_bytes == 0 {
                anyhow::bail!("Agent stream max frame size must be greater than 0");
            }
        }

        if self.agents.combolist_platform.trim().is_empty() {
            anyhow::bail!("COMBOLIST_PLATFORM cannot be empty");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            stream: StreamConfig::default(),
            agents: AgentConfig {
                combolist_platform: DEFAULT_COMBOLIST_PLATFORM.to_string(),
            },
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: DEFAULT_AGENT_STREAM_ADDR.to_string(),
            queue_size: DEFAULT_AGENT_STREAM_QUEUE_SIZE,
            workers: DEFAULT_AGENT_STREAM_WORKERS,
            max_frame_bytes: DEFAULT_AGENT_STREAM_MAX_FRAME_BYTES,
        }
    }
}
