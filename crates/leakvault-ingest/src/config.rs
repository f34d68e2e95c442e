//! Operator tool configuration
//!
//! Database settings are read from a YAML file:
//!
//! ```yaml
//! database:
//!   host: 127.0.0.1
//!   port: 5432
//!   username: postgres
//!   password: ""
//!   dbname: leakvault
//!   sslmode: disable
//!   max_connections: 10
//!   timeout: 30
//! ```
//!
//! `DATABASE_URL`, when set, replaces the whole `database` section.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use leakvault_common::{IngestError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Connection URL taken from the environment; not part of the file
    #[serde(skip)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
    pub max_connections: u32,
    /// Pool acquire timeout in seconds
    pub timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            dbname: "leakvault".to_string(),
            sslmode: "disable".to_string(),
            max_connections: 10,
            timeout: 30,
        }
    }
}

impl IngestConfig {
    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| IngestError::Config(format!("invalid YAML: {}", e)))
    }

    /// Read `path` and apply the `DATABASE_URL` override.
    ///
    /// A missing file is only an error when no `DATABASE_URL` is set.
    pub fn load(path: &Path) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let mut config = match std::fs::read_to_string(path) {
            Ok(yaml) => Self::from_yaml(&yaml)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && database_url.is_some() => {
                Self::default()
            },
            Err(e) => {
                return Err(IngestError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            },
        };
        config.database_url = database_url;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.database_url.is_none() {
            PgSslMode::from_str(&self.database.sslmode).map_err(|_| {
                IngestError::Config(format!("unknown sslmode '{}'", self.database.sslmode))
            })?;
        }
        Ok(())
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(ref url) = self.database_url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| IngestError::Config(format!("invalid DATABASE_URL: {}", e)));
        }

        let db = &self.database;
        let ssl_mode = PgSslMode::from_str(&db.sslmode)
            .map_err(|_| IngestError::Config(format!("unknown sslmode '{}'", db.sslmode)))?;

        Ok(PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.username)
            .password(&db.password)
            .database(&db.dbname)
            .ssl_mode(ssl_mode))
    }

    /// Build the shared pool handed to the registry and entry store.
    pub async fn connect(&self) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.database.max_connections)
            .acquire_timeout(Duration::from_secs(self.database.timeout))
            .connect_with(self.connect_options()?)
            .await
            .map_err(|e| IngestError::Persistence(format!("cannot connect to database: {}", e)))
    }
}
