//! Coordinator configuration.
//!
//! Covers the liveness timeout, the civil-time offset, pagination limits,
//! the viewer session credentials blob handed to workers, and the
//! PostgreSQL connection settings.

use std::fmt;
use std::path::Path;

use deadpool_postgres::{Config, CreatePoolError, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

use crate::error::{ControlError, Result};

/// Core coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Seconds without a heartbeat before a worker is considered offline.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Fixed UTC offset (hours east) used to stamp every timestamp.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    /// Hard cap on listing page sizes.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    /// Opaque viewer session credentials echoed into task assignments.
    /// No algorithmic role; loaded from a JSON file, never hard-coded.
    #[serde(default = "default_session_credentials")]
    pub session_credentials: serde_json::Value,
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_utc_offset() -> i32 {
    8
}

fn default_max_page_size() -> i64 {
    200
}

fn default_session_credentials() -> serde_json::Value {
    serde_json::json!({})
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            utc_offset_hours: default_utc_offset(),
            max_page_size: default_max_page_size(),
            session_credentials: default_session_credentials(),
        }
    }
}

impl ControlConfig {
    /// Load the session credentials blob from a JSON file.
    pub fn load_session_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControlError::InvalidArgument(format!("cannot read session file {path:?}: {e}"))
        })?;
        self.session_credentials = serde_json::from_str(&raw).map_err(|e| {
            ControlError::InvalidArgument(format!("session file {path:?} is not valid JSON: {e}"))
        })?;
        Ok(())
    }
}

/// PostgreSQL connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("dbname", &self.dbname)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

fn default_pool_size() -> usize {
    16
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "watch_control".to_string(),
            pool_size: default_pool_size(),
        }
    }
}

pub fn create_pool(cfg: &PgConfig) -> std::result::Result<Pool, CreatePoolError> {
    let mut config = Config::new();
    config.host = Some(cfg.host.clone());
    config.port = Some(cfg.port);
    config.user = Some(cfg.user.clone());
    config.password = Some(cfg.password.clone());
    config.dbname = Some(cfg.dbname.clone());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    config.create_pool(Some(Runtime::Tokio1), NoTls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert_eq!(config.utc_offset_hours, 8);
        assert_eq!(config.max_page_size, 200);
        assert_eq!(config.session_credentials, serde_json::json!({}));
    }

    #[test]
    fn test_control_config_partial_deserialization() {
        let config: ControlConfig =
            serde_json::from_str(r#"{"heartbeat_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.heartbeat_timeout_secs, 30);
        assert_eq!(config.utc_offset_hours, 8);
    }

    #[test]
    fn test_pg_config_debug_redacts_password() {
        let config = PgConfig {
            password: "s3cret".to_string(),
            ..PgConfig::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("[REDACTED]"));
    }
}
