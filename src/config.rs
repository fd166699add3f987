//! Daemon configuration
//!
//! Layered with figment: serde defaults, then the JSON file named by
//! `CONFIG_PATH` (default `config.json`), then `MQTT_*` / `SSH_*` environment
//! overrides.

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::ErrorCode;

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const PROFILES_DIR_ENV: &str = "PROFILES_DIR";

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_PROFILES_DIR: &str = "./profiles";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigInvalid
    }

    fn validation(field: &str, reason: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub cafile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub qos: u8,
    pub keepalive: u64,
    pub clean_session: bool,
    pub retained_online: bool,
    pub prefix: String,
    pub instance: String,
    pub client_id: Option<String>,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            tls_enabled: false,
            cafile: None,
            certfile: None,
            keyfile: None,
            username: None,
            password: None,
            qos: 1,
            keepalive: 30,
            clean_session: true,
            retained_online: true,
            prefix: "chrishansentech".into(),
            instance: "default".into(),
            client_id: None,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Client id, derived from prefix and instance unless configured
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}-doorbell-mqtt-unifi-{}", self.prefix, self.instance),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Name of the environment variable that holds the password
    pub password_env: String,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 22,
            user: "ubnt".into(),
            password_env: String::new(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Local root for apply working directories
    pub work_dir: PathBuf,
    /// Staging directory on the device
    pub remote_staging_dir: String,
    /// Profile applied by the test command
    pub test_profile_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/doorbell-mqtt-unifi"),
            remote_staging_dir: "/tmp/doorbell-mqtt-unifi".into(),
            test_profile_dir: PathBuf::from("./test-assets"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub ssh: SshConfig,
    /// Display name -> profile directory, validated by the preset table
    pub presets: BTreeMap<String, serde_json::Value>,
    pub paths: PathsConfig,
    pub log_level: String,
    /// Profiles base directory; taken from `PROFILES_DIR`, not the file
    #[serde(skip)]
    pub profiles_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            ssh: SshConfig::default(),
            presets: BTreeMap::new(),
            paths: PathsConfig::default(),
            log_level: "info".into(),
            profiles_dir: PathBuf::from(DEFAULT_PROFILES_DIR),
        }
    }
}

/// Path of the configuration file
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Profiles base directory
pub fn profiles_dir() -> PathBuf {
    std::env::var_os(PROFILES_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILES_DIR))
}

/// Load from the file named by `CONFIG_PATH` plus the environment
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_from(&config_path(), true)?;
    config.profiles_dir = profiles_dir();
    Ok(config)
}

fn load_from(path: &Path, with_env: bool) -> Result<Config, ConfigError> {
    let mut figment = Figment::new().merge(Json::file(path));
    if with_env {
        figment = figment
            .merge(Env::prefixed("MQTT_").map(|key| format!("mqtt.{key}").into()))
            .merge(Env::prefixed("SSH_").map(|key| format!("ssh.{key}").into()));
    }

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.qos > 2 {
            return Err(ConfigError::validation("mqtt.qos", "must be 0, 1 or 2"));
        }
        if self.mqtt.prefix.trim().is_empty() {
            return Err(ConfigError::validation("mqtt.prefix", "must not be empty"));
        }
        if self.mqtt.instance.trim().is_empty() {
            return Err(ConfigError::validation("mqtt.instance", "must not be empty"));
        }
        if self.mqtt.tls_enabled && self.mqtt.cafile.is_none() {
            return Err(ConfigError::validation(
                "mqtt.cafile",
                "required when tls_enabled is set",
            ));
        }
        if self.mqtt.certfile.is_some() != self.mqtt.keyfile.is_some() {
            return Err(ConfigError::validation(
                "mqtt.certfile",
                "certfile and keyfile must be set together",
            ));
        }
        if self.ssh.password_env.trim().is_empty() {
            return Err(ConfigError::validation("ssh.password_env", "must not be empty"));
        }
        if self.paths.remote_staging_dir.trim_end_matches('/').is_empty() {
            return Err(ConfigError::validation(
                "paths.remote_staging_dir",
                "must not be empty or the filesystem root",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_file_values_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{
                "mqtt": {"host": "broker.lan", "instance": "front"},
                "ssh": {"host": "10.0.0.5", "password_env": "DOORBELL_PW"},
                "presets": {"Christmas": "presets/christmas"}
            }"#,
        );

        let config = load_from(&path, false).unwrap();

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.client_id(), "chrishansentech-doorbell-mqtt-unifi-front");
        assert_eq!(config.ssh.user, "ubnt");
        assert_eq!(config.ssh.password_env, "DOORBELL_PW");
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_password_env_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"ssh": {"host": "10.0.0.5"}}"#);

        let err = load_from(&path, false).unwrap_err();

        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "ssh.password_env"));
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_bad_qos_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"mqtt": {"qos": 3}, "ssh": {"password_env": "PW"}}"#);

        assert!(load_from(&path, false).is_err());
    }

    #[test]
    fn test_tls_requires_cafile() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"mqtt": {"tls_enabled": true}, "ssh": {"password_env": "PW"}}"#,
        );

        let err = load_from(&path, false).unwrap_err();
        assert!(err.to_string().contains("mqtt.cafile"));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{ nope");

        assert!(matches!(load_from(&path, false), Err(ConfigError::Figment(_))));
    }
}
