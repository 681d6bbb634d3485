//! Application settings: defaults, then an optional file, then `DMS__*` env vars

use std::path::Path;

use camera_capture::CameraConfig;
use config::{Config, ConfigError, Environment, File};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};

/// File looked up in the working directory when no path is given
const DEFAULT_FILE: &str = "dms-monitor";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub capture: CameraConfig,
    pub dms: DmsConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppSettings {
    /// Layer the sources. An explicit `path` must exist; without one,
    /// `dms-monitor.{toml,yaml,json}` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let settings: AppSettings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("DMS").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings
            .dms
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    /// Removed when dropped, even if the test fails
    fn toml_file() -> NamedTempFile {
        tempfile::Builder::new().suffix(".toml").tempfile().unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.server.addr, "0.0.0.0:5000");
        assert_eq!(settings.capture.fps, 15);
        assert_eq!(settings.dms.ear_threshold, 0.22);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file();
        std::fs::write(
            file.path(),
            r#"
[server]
addr = "127.0.0.1:9000"

[dms]
ear_threshold = 0.25
emotion_model_path = "models/emotion.onnx"

[dms.emotion_input]
height = 64
width = 64
channels = 1
"#,
        )
        .unwrap();

        let settings = AppSettings::load(Some(file.path())).unwrap();

        assert_eq!(settings.server.addr, "127.0.0.1:9000");
        assert_eq!(settings.dms.ear_threshold, 0.25);
        assert_eq!(settings.dms.emotion_input.height, 64);
        assert_eq!(
            settings.dms.emotion_model_path.as_deref(),
            Some(Path::new("models/emotion.onnx"))
        );
        // untouched sections keep their defaults
        assert_eq!(settings.capture.fps, 15);
        assert!(!settings.logging.json);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = toml_file();
        std::fs::write(file.path(), "[dms]\near_threshold = -1.0\n").unwrap();
        assert!(AppSettings::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(AppSettings::load(Some(Path::new("/no/such/dms-monitor.toml"))).is_err());
    }
}
