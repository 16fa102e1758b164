use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Capacity of the outbound and diagnostic broadcast channels.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// How long an armed listener waits for its response. `null` waits forever.
    #[serde(default = "default_response_timeout", with = "option_duration_ms")]
    pub response_timeout: Option<Duration>,

    /// Attach a `request_id` to every request and accept only responses echoing it.
    #[serde(default)]
    pub correlation: bool,

    /// When set, simulation requests are only sent in this mode.
    #[serde(default)]
    pub simulation_mode: Option<String>,

    #[serde(default)]
    pub session: Option<SessionConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            response_timeout: default_response_timeout(),
            correlation: false,
            simulation_mode: None,
            session: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            BridgeError::config(format!(
                "Failed to open config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Session parameters with the cookie wrapped as a secret.
    pub fn session_params(&self) -> Option<SessionParams> {
        self.session.clone().map(SessionParams::from)
    }
}

/// Identifies the client session during the connection handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: String,
    #[serde(default)]
    pub cookie: String,
    #[serde(default = "default_tab_id", rename = "tabId")]
    pub tab_id: String,
}

#[derive(Debug, Clone)]
pub struct SessionParams {
    pub id: String,
    pub cookie: SecretString,
    pub tab_id: String,
}

impl From<SessionConfig> for SessionParams {
    fn from(config: SessionConfig) -> Self {
        Self {
            id: config.id,
            cookie: SecretString::from(config.cookie),
            tab_id: config.tab_id,
        }
    }
}

fn default_event_buffer_size() -> usize {
    64
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_tab_id() -> String {
    "0".to_string()
}

pub mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config.event_buffer_size, 64);
        assert_eq!(config.response_timeout, Some(Duration::from_secs(30)));
        assert!(!config.correlation);
        assert!(config.simulation_mode.is_none());
        assert!(config.session_params().is_none());
    }

    #[test]
    fn test_null_timeout_disables_it() {
        let config = BridgeConfig::from_json(r#"{"response_timeout": null}"#).unwrap();
        assert_eq!(config.response_timeout, None);
    }

    #[test]
    fn test_timeout_round_trip_in_millis() {
        let config = BridgeConfig {
            response_timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["response_timeout"], 1500);
        let back: BridgeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.response_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_file_with_session() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "correlation": true,
                "simulation_mode": "strategy_random",
                "session": {{"id": "s1", "cookie": "c00kie", "tabId": "7"}}
            }}"#
        )
        .unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert!(config.correlation);
        assert_eq!(config.simulation_mode.as_deref(), Some("strategy_random"));

        let session = config.session_params().unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.tab_id, "7");
        assert_eq!(session.cookie.expose_secret(), "c00kie");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = BridgeConfig::from_file("/nonexistent/bridge.json");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
