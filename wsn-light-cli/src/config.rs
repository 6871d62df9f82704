//! Configuration file loading
//!
//! Files ending in `.json` (or whose content is a JSON object) are read as
//! JSON, everything else as TOML. Missing fields take their defaults, and
//! legacy JSON settings files load through the core config's field aliases.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use wsn_light_core::LightConfig;

/// Settings file looked up in the home directory when no path is given
pub const DEFAULT_CONFIG_NAME: &str = ".wsnlight.conf";

/// `~/.wsnlight.conf`, if a home directory is known
pub fn default_config_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_NAME))
}

/// Load and parse a configuration file
pub fn load_config(path: &Path) -> Result<LightConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: LightConfig = if is_json(path, &content) {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON config file: {:?}", path))?
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?
    };

    Ok(config)
}

/// Load `explicit` if given, else the default settings file if it exists,
/// else built-in defaults
pub fn resolve_config(explicit: Option<&Path>) -> Result<LightConfig> {
    if let Some(path) = explicit {
        log::info!("Loading configuration from: {:?}", path);
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.is_file() => {
            log::info!("Loading configuration from: {:?}", path);
            load_config(&path)
        }
        _ => {
            log::info!("No configuration file, using defaults");
            Ok(LightConfig::default())
        }
    }
}

fn is_json(path: &Path, content: &str) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => true,
        Some(ext) if ext.eq_ignore_ascii_case("toml") => false,
        _ => content.trim_start().starts_with('{'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_toml_config() {
        let file = write_config(
            ".toml",
            r#"
                [link]
                port = "/dev/ttyUSB0"
                baud_index = 7

                [sensors]
                addresses = [3, 4, 5]
                max_value = 512

                [output]
                frame_rate = 44
            "#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.link.port, "/dev/ttyUSB0");
        assert_eq!(config.link.baud_rate().unwrap(), 115200);
        assert_eq!(config.link.network_id, "1111");
        assert_eq!(config.sensors.addresses, vec![3, 4, 5]);
        assert_eq!(config.sensors.depth_seconds, 3);
        assert_eq!(config.output.frame_rate, 44);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_config() {
        let file = write_config(".json", r#"{"sensors": {"addresses": [19], "auto_fall_seconds": 1.5}}"#);

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sensors.addresses, vec![19]);
        assert_eq!(config.auto_fall_ticks(), 45);
        assert_eq!(config.output.max_value, 255);
    }

    #[test]
    fn test_json_detected_without_extension() {
        let file = write_config(".conf", r#"{"output": {"universe": 2}}"#);
        assert_eq!(load_config(file.path()).unwrap().output.universe, 2);
    }

    #[test]
    fn test_bad_config_reports_path() {
        let file = write_config(".toml", "[sensors]\naddresses = \"nineteen\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));

        assert!(load_config(Path::new("/nonexistent/wsnlight.toml")).is_err());
    }

    #[test]
    fn test_legacy_settings_file() {
        let file = write_config(
            ".conf",
            r#"{"xbee": {"serial": "/dev/ttyUSB3", "ATID": "2222"},
                "sensor": {"addr": [5, 6], "depth": 1},
                "dmx": {"fps": 60}}"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.link.port, "/dev/ttyUSB3");
        assert_eq!(config.link.network_id, "2222");
        assert_eq!(config.sensors.addresses, vec![5, 6]);
        assert_eq!(config.sensors.depth_seconds, 1);
        assert_eq!(config.output.frame_rate, 60);
    }

    #[test]
    fn test_explicit_path_wins() {
        let file = write_config(".toml", "[output]\nchannels = 16\n");
        let config = resolve_config(Some(file.path())).unwrap();
        assert_eq!(config.output.channels, 16);
    }

    #[test]
    fn test_printed_config_round_trips() {
        let config = LightConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: LightConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
