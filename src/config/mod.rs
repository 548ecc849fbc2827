//! Runtime configuration
//!
//! The TOML configuration file controls the surrounding runtime (listen
//! ports, file locations, polling intervals).  Unknown keys are a hard
//! error.  The legacy device list has its own format and parser, see
//! [`polldevs`].

pub mod polldevs;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ZinoError, ZinoResult};

/// Top-level Zino configuration, loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    pub archiving: ArchivingConfig,
    pub polling: PollingConfig,
    pub authentication: AuthenticationConfig,
    pub listen: ListenConfig,
    pub snmp: SnmpConfig,
    pub persistence: PersistenceConfig,
}

impl Configuration {
    /// Loads and validates the configuration file.  Unknown keys anywhere in
    /// the file are rejected.
    pub fn load(path: &Path) -> ZinoResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|error| ZinoError::Configuration(format!("{}: {}", path.display(), error)))?;
        settings
            .try_deserialize()
            .map_err(|error| ZinoError::Configuration(format!("{}: {}", path.display(), error)))
    }
}

/// Where closed events are archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ArchivingConfig {
    pub old_events_dir: PathBuf,
}

impl Default for ArchivingConfig {
    fn default() -> Self {
        Self {
            old_events_dir: PathBuf::from("old-events"),
        }
    }
}

/// Polling behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PollingConfig {
    /// Path to the legacy device list
    pub file: PathBuf,
    /// Interval between flap score decay runs, in seconds
    pub decay_interval: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("polldevs.cf"),
            decay_interval: crate::flaps::FLAP_DECREMENT_INTERVAL_SECONDS,
        }
    }
}

/// Operator authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthenticationConfig {
    /// Path to the `username secret` file
    pub file: PathBuf,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("secrets"),
        }
    }
}

/// Listening addresses and ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ListenConfig {
    pub address: String,
    pub api_port: u16,
    pub notify_port: u16,
    pub trap_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            api_port: 8001,
            notify_port: 8002,
            trap_port: 162,
        }
    }
}

/// SNMP backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnmpConfig {
    pub backend: SnmpBackendKind,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            backend: SnmpBackendKind::Udp,
        }
    }
}

/// Available SNMP back-ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpBackendKind {
    /// The built-in v2c-over-UDP transport
    Udp,
    /// The scripted in-memory agent, for tests and dry runs
    Mock,
}

/// State snapshot behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PersistenceConfig {
    pub file: PathBuf,
    /// Seconds between state snapshots
    pub period: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("zino-state.json"),
            period: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_from_str(content: &str) -> ZinoResult<Configuration> {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        Configuration::load(file.path())
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = load_from_str("").unwrap();
        assert_eq!(config.listen.api_port, 8001);
        assert_eq!(config.listen.notify_port, 8002);
        assert_eq!(config.polling.file, PathBuf::from("polldevs.cf"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = load_from_str(
            "[listen]\napi_port = 9001\n\n[polling]\nfile = \"devices.cf\"\n",
        )
        .unwrap();
        assert_eq!(config.listen.api_port, 9001);
        assert_eq!(config.polling.file, PathBuf::from("devices.cf"));
    }

    #[test]
    fn unknown_keys_are_a_hard_error() {
        let result = load_from_str("[listen]\napi_prot = 9001\n");
        assert!(matches!(result, Err(ZinoError::Configuration(_))));
    }

    #[test]
    fn unknown_sections_are_a_hard_error() {
        let result = load_from_str("[telemetry]\nenabled = true\n");
        assert!(matches!(result, Err(ZinoError::Configuration(_))));
    }
}
