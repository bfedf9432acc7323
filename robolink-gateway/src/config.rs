//! Gateway configuration: one JSON5 file for every subsystem.

use robolink_framework::{LoggingConfig, Result, ServiceConfig, ServiceError};
use robolink_modbus::ControllerConfig;
use robolink_relay::{CameraConfig, RelayConfig};
use robolink_store::DatabaseConfig;
use serde::Deserialize;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Modbus controller and poll schedule
    pub controller: ControllerConfig,

    /// Camera whose stream the relay serves
    pub camera: CameraConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    /// PostgreSQL store; without it telemetry is kept in memory only
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig for GatewayConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        self.controller
            .validate()
            .map_err(|e| ServiceError::validation(e.to_string()))?;
        self.camera
            .validate()
            .map_err(|e| ServiceError::validation(e.to_string()))?;
        self.relay
            .validate()
            .map_err(|e| ServiceError::validation(e.to_string()))?;
        if let Some(database) = &self.database {
            database.validate().map_err(ServiceError::validation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        controller: { host: "192.168.0.10", slave_count: 3 },
        camera: { host: "192.168.0.20", username: "admin", password: "s3cret" },
    }"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = GatewayConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.controller.port, 502);
        assert_eq!(config.controller.poll_interval_secs, 5);
        assert_eq!(config.relay.listen.port(), 8765);
        assert_eq!(config.relay.path, "/");
        assert_eq!(config.relay.jpeg_quality, 70);
        assert!(config.database.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::parse(
            r#"{
                controller: {
                    host: "plc.local", port: 5020, slave_count: 12,
                    poll_interval_secs: 2, backoff_secs: 30, oee_scale: 0.1,
                },
                camera: { host: "cam.local", port: 8080, username: "admin", password: "x", profile_token: "main" },
                relay: { listen: "127.0.0.1:9000", path: "/video", queue_depth: 4, ffmpeg: { rtsp_transport: "udp" } },
                database: { username: "robolink", password: "y", database: "robots" },
                logging: { level: "debug", format: "json" },
            }"#,
        )
        .unwrap();

        assert_eq!(config.controller.slave_count, 12);
        assert_eq!(config.camera.profile_token.as_deref(), Some("main"));
        assert_eq!(config.relay.path, "/video");
        assert_eq!(config.relay.ffmpeg.rtsp_transport, "udp");
        assert_eq!(config.database.as_ref().map(|d| d.port), Some(5432));
        assert_eq!(config.logging.format, robolink_framework::LogFormat::Json);
    }

    #[test]
    fn test_section_validation_is_applied() {
        let bad_controller = r#"{
            controller: { host: "plc", slave_count: 0 },
            camera: { host: "cam" },
        }"#;
        assert!(matches!(
            GatewayConfig::parse(bad_controller),
            Err(ServiceError::ConfigValidation(_))
        ));

        let bad_relay = r#"{
            controller: { host: "plc", slave_count: 1 },
            camera: { host: "cam" },
            relay: { jpeg_quality: 0 },
        }"#;
        assert!(matches!(
            GatewayConfig::parse(bad_relay),
            Err(ServiceError::ConfigValidation(_))
        ));

        let bad_database = r#"{
            controller: { host: "plc", slave_count: 1 },
            camera: { host: "cam" },
            database: { username: "u", database: "" },
        }"#;
        assert!(matches!(
            GatewayConfig::parse(bad_database),
            Err(ServiceError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let result = GatewayConfig::parse(r#"{ camera: { host: "cam" } }"#);
        assert!(matches!(result, Err(ServiceError::ConfigParse(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = GatewayConfig::parse(
            r#"{
                controller: { host: "plc", slave_count: 1 },
                camera: { host: "cam", username: "admin", password: "camera-pass" },
                database: { username: "robolink", password: "db-pass", database: "robots" },
            }"#,
        )
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("camera-pass"));
        assert!(!debug.contains("db-pass"));
    }

    #[test]
    fn test_sample_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../robolink.json5");
        let config = GatewayConfig::load(path).unwrap();

        assert_eq!(config.controller.register_map.block_len(), 6);
        assert_eq!(
            config.controller.register_map,
            robolink_modbus::RegisterMap::standard()
        );
        assert!(config.database.is_some());
        assert_eq!(config.relay.listen.port(), 8765);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", MINIMAL).unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.camera.host, "192.168.0.20");
    }
}
