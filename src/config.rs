//! Server configuration model, defaults, and TOML loading (spec §6.4).
//!
//! A missing or incomplete `[database]` section puts the server in
//! degraded mode: callers check [`Config::database_available`] and fall
//! back to a `HistoryStore` that reports everything as not-yet-loaded
//! rather than failing outright.

use std::path::{Path, PathBuf};

use log::warn;

/// Root configuration loaded from `pmp-server.toml` plus environment
/// overrides.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default = "default_server_caption")]
    pub server_caption: String,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Player defaults applied when a fresh `Player` is constructed.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

/// Library scan configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub scan_directories: Vec<PathBuf>,
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub fixed_server_password: Option<String>,
}

/// Database connection parameters. Every field is mandatory once the
/// `[database]` section is present; a missing section as a whole means
/// "no database configured" rather than a parse error.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DatabaseConfig {
    pub hostname: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Listening ports for the control protocol and LAN discovery.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub tcp_port: u16,
    #[serde(default = "default_port")]
    pub udp_discovery_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_caption: default_server_caption(),
            player: PlayerConfig::default(),
            media: MediaConfig::default(),
            security: SecurityConfig::default(),
            database: None,
            network: NetworkConfig::default(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            scan_directories: Vec::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fixed_server_password: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_port(),
            udp_discovery_port: default_port(),
        }
    }
}

impl Config {
    /// Whether the database is configured. When `false`, history and
    /// statistics queries run in degraded mode (spec §6.4).
    pub fn database_available(&self) -> bool {
        self.database.is_some()
    }

    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist. A malformed file is reported rather than
    /// silently discarded.
    pub fn load(path: &Path) -> std::io::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| {
            warn!("config: failed to parse {}: {}", path.display(), err);
            std::io::Error::new(std::io::ErrorKind::InvalidData, err)
        })
    }

    /// Default config file location: `<config_dir>/pmp-server/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pmp-server").join("config.toml"))
    }
}

fn default_server_caption() -> String {
    "PMP server".to_string()
}

fn default_volume() -> u8 {
    75
}

fn default_database_port() -> u16 {
    5432
}

fn default_port() -> u16 {
    23432
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_values_and_no_database() {
        let config = Config::default();
        assert_eq!(config.server_caption, "PMP server");
        assert_eq!(config.player.default_volume, 75);
        assert!(config.media.scan_directories.is_empty());
        assert!(config.security.fixed_server_password.is_none());
        assert!(config.database.is_none());
        assert!(!config.database_available());
        assert_eq!(config.network.tcp_port, 23432);
        assert_eq!(config.network.udp_discovery_port, 23432);
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        let partial_toml = r#"
server_caption = "Living room"

[media]
scan_directories = ["/music"]
"#;
        let parsed: Config = toml::from_str(partial_toml).expect("config should parse");
        assert_eq!(parsed.server_caption, "Living room");
        assert_eq!(parsed.media.scan_directories, vec![PathBuf::from("/music")]);
        assert_eq!(parsed.player.default_volume, 75);
        assert!(!parsed.database_available());
        assert_eq!(parsed.network.tcp_port, 23432);
    }

    #[test]
    fn test_database_section_present_enables_non_degraded_mode() {
        let toml_with_db = r#"
[database]
hostname = "localhost"
username = "pmp"
password = "secret"
"#;
        let parsed: Config = toml::from_str(toml_with_db).expect("config should parse");
        assert!(parsed.database_available());
        let db = parsed.database.unwrap();
        assert_eq!(db.hostname, "localhost");
        assert_eq!(db.port, 5432);
    }

    #[test]
    fn test_load_returns_default_when_file_missing() {
        let missing = PathBuf::from("/nonexistent/pmp-server-config-test-path/config.toml");
        let loaded = Config::load(&missing).expect("missing file should fall back to defaults");
        assert_eq!(loaded, Config::default());
    }
}
