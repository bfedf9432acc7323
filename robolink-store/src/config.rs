use std::fmt;

use robolink_common::redact;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

/// PostgreSQL connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Database name
    pub database: String,

    /// Pool size; the poller writes one batch at a time
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a batch waits for a connection, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    5
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("database.host must not be empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("database.database must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("database.max_connections must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("database.connect_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Connection options; the password never passes through a URL string.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .application_name("robolink-gateway")
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: DatabaseConfig =
            json5::from_str(r#"{ username: "robolink", password: "s3cret", database: "plant" }"#).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_connections, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_hides_password() {
        let config: DatabaseConfig =
            json5::from_str(r#"{ username: "robolink", password: "s3cret", database: "plant" }"#).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("plant"));
    }

    #[test]
    fn test_validation() {
        let config: DatabaseConfig =
            json5::from_str(r#"{ username: "u", database: "", max_connections: 0 }"#).unwrap();
        assert!(config.validate().is_err());
    }
}
