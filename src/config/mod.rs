//! Configuration loading
//!
//! Configuration is read from an optional TOML file. Every section falls back
//! to its defaults, so an empty file (or no file) is a valid configuration.

mod schema;

pub use schema::*;

use std::path::Path;

use crate::error::{AppError, Result};

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw)
            .map_err(|e| AppError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.websocket.ping_period_secs == 0 {
            return Err(AppError::Config(
                "websocket.ping_period_secs must be greater than zero".to_string(),
            ));
        }
        if self.websocket.inactive_cursors_period_ms == 0 {
            return Err(AppError::Config(
                "websocket.inactive_cursors_period_ms must be greater than zero".to_string(),
            ));
        }

        let webrtc = &self.webrtc;
        if (webrtc.ephemeral_min == 0) != (webrtc.ephemeral_max == 0) {
            return Err(AppError::Config(
                "webrtc.ephemeral_min and webrtc.ephemeral_max must be set together".to_string(),
            ));
        }
        if webrtc.ephemeral_min > webrtc.ephemeral_max {
            return Err(AppError::Config(format!(
                "Invalid ephemeral port range {}-{}",
                webrtc.ephemeral_min, webrtc.ephemeral_max
            )));
        }
        if webrtc.pli_interval_ms == 0 {
            return Err(AppError::Config(
                "webrtc.pli_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.capture.video_ids.is_empty() {
            return Err(AppError::Config(
                "capture.video_ids must contain at least one stream".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.websocket.ping_period_secs, 10);
        assert_eq!(config.websocket.inactive_cursors_period_ms, 750);
        assert_eq!(config.webrtc.pli_interval_ms, 3000);
        assert_eq!(config.desktop.drop_delay_ms, 100);
        assert!(config.webrtc.ice_trickle);
        assert_eq!(config.webrtc.tcp_mux, 0);
        assert_eq!(config.capture.video_ids, vec!["main".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[webrtc]
ice_lite = true
nat1to1 = ["203.0.113.7"]
udp_mux = 52000

[[webrtc.ice_servers]]
urls = ["turn:turn.example.com:3478"]
username = "user"
credential = "secret"

[session.settings]
inactive_cursors = true

[[session.members]]
id = "admin"
token = "admin-token"

[session.members.profile]
name = "Admin"
is_admin = true
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert!(config.webrtc.ice_lite);
        assert_eq!(config.webrtc.nat1to1, vec!["203.0.113.7".to_string()]);
        assert_eq!(config.webrtc.udp_mux, 52000);
        assert_eq!(config.webrtc.ice_servers.len(), 1);
        assert_eq!(config.webrtc.ice_servers[0].username, "user");
        assert!(config.session.settings.inactive_cursors);
        assert_eq!(config.session.members.len(), 1);
        assert!(config.session.members[0].profile.is_admin);
        assert_eq!(config.session.members[0].profile.name, "Admin");
    }

    #[test]
    fn test_rejects_half_open_port_range() {
        let err = AppConfig::from_toml("[webrtc]\nephemeral_min = 50000\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_port_range() {
        let raw = "[webrtc]\nephemeral_min = 60000\nephemeral_max = 50000\n";
        assert!(AppConfig::from_toml(raw).is_err());
    }

    #[test]
    fn test_rejects_zero_ping_period() {
        assert!(AppConfig::from_toml("[websocket]\nping_period_secs = 0\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
