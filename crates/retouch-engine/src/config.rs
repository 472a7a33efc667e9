use std::env;
use std::path::PathBuf;
use std::time::Duration;

use retouch_contracts::events::EventWriter;
use retouch_contracts::session::DEFAULT_CREDITS;
use serde_json::{Map, Value};

use crate::gateway::{default_provider_registry, EditGateway};
use crate::voice::ERROR_DISPLAY_DELAY;

pub const DEFAULT_STATE_DIR: &str = ".retouch";
pub const STORE_FILE_NAME: &str = "session.json";
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Runtime settings, read from the environment and then overridden by the
/// caller (CLI flags).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub state_dir: PathBuf,
    pub events_path: Option<PathBuf>,
    pub image_model: Option<String>,
    pub text_model: Option<String>,
    pub starting_credits: u32,
    pub transcribe_url: Option<String>,
    pub request_timeout_s: Option<f64>,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: Option<String>,
    pub error_display_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            events_path: None,
            image_model: None,
            text_model: None,
            starting_credits: DEFAULT_CREDITS,
            transcribe_url: None,
            request_timeout_s: None,
            gemini_api_key: None,
            gemini_api_base: None,
            error_display_delay: ERROR_DISPLAY_DELAY,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            state_dir: lookup("RETOUCH_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            starting_credits: lookup("RETOUCH_CREDITS")
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(defaults.starting_credits),
            transcribe_url: lookup("RETOUCH_TRANSCRIBE_URL"),
            request_timeout_s: lookup("RETOUCH_REQUEST_TIMEOUT")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value > 0.0),
            gemini_api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
            gemini_api_base: lookup("GEMINI_API_BASE"),
            ..defaults
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE_NAME)
    }

    pub fn events_path(&self) -> PathBuf {
        self.events_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join(EVENTS_FILE_NAME))
    }

    /// Options forwarded to every provider request.
    pub fn provider_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        if let Some(timeout) = self.request_timeout_s {
            options.insert("request_timeout".to_string(), Value::from(timeout));
        }
        options
    }

    pub fn gateway(&self, events: EventWriter) -> EditGateway {
        EditGateway::new(
            default_provider_registry(self.gemini_api_base.clone(), self.gemini_api_key.clone()),
            self.image_model.clone(),
            self.text_model.clone(),
            events,
        )
        .with_options(self.provider_options())
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use serde_json::Value;

    use super::EngineConfig;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.starting_credits, 20);
        assert_eq!(config.store_path(), PathBuf::from(".retouch/session.json"));
        assert_eq!(config.events_path(), PathBuf::from(".retouch/events.jsonl"));
        assert!(config.provider_options().is_empty());
    }

    #[test]
    fn environment_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("RETOUCH_STATE_DIR", "/tmp/rt"),
            ("RETOUCH_CREDITS", "5"),
            ("RETOUCH_REQUEST_TIMEOUT", "45"),
            ("GOOGLE_API_KEY", "g-key"),
            ("RETOUCH_TRANSCRIBE_URL", "http://localhost:9000/stt"),
        ]));
        assert_eq!(config.state_dir, PathBuf::from("/tmp/rt"));
        assert_eq!(config.starting_credits, 5);
        assert_eq!(config.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(
            config.provider_options().get("request_timeout"),
            Some(&Value::from(45.0))
        );
        assert_eq!(
            config.transcribe_url.as_deref(),
            Some("http://localhost:9000/stt")
        );
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("RETOUCH_CREDITS", "lots"),
            ("RETOUCH_REQUEST_TIMEOUT", "-3"),
        ]));
        assert_eq!(config.starting_credits, 20);
        assert_eq!(config.request_timeout_s, None);
    }
}
