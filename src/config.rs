//! Deployment configuration read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `SIMULATOR_ENABLED` | `true` |
//! | `SIMULATOR_PYTHON` | `python` |
//! | `SIMULATOR_BRIDGE` | `./scripts/simulator_bridge.py` |
//! | `SIMULATOR_CALL_TIMEOUT_MS` | none |
//! | `SIMULATOR_RESPAWN_BACKOFF_MS` | none |
//! | `SIMULATOR_MAX_CONSECUTIVE_FAILURES` | unbounded |
//! | `LONGFORM_AUDIO_BASE64_DISABLED` | `false` |
//! | `LONGFORM_AUDIO_BASE64_MAX_LEN` | `500000` |
//! | `SIMULATOR_AUDIO_URL_EXPIRES_SECS` | `600` |

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SimulatorError};
use crate::supervisor::RespawnPolicy;

pub const DEFAULT_BRIDGE_PATH: &str = crate::client::DEFAULT_BRIDGE_SCRIPT;
pub const DEFAULT_AUDIO_BASE64_MAX_LEN: usize = 500_000;
pub const DEFAULT_AUDIO_URL_EXPIRES: Duration = Duration::from_secs(600);

/// What to do with synthesized reply audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPolicy {
    /// Never pass base64 audio through.
    pub disabled: bool,
    /// Drop base64 audio longer than this many characters.
    pub max_len: usize,
}

impl Default for AudioPolicy {
    fn default() -> Self {
        Self {
            disabled: false,
            max_len: DEFAULT_AUDIO_BASE64_MAX_LEN,
        }
    }
}

impl AudioPolicy {
    /// Apply the policy to the audio of one reply.
    pub fn filter(&self, audio: Option<String>) -> Option<String> {
        if self.disabled {
            return None;
        }
        audio.filter(|a| a.len() <= self.max_len)
    }
}

/// Simulator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub program: String,
    pub bridge_script: String,
    pub call_timeout: Option<Duration>,
    pub respawn: RespawnPolicy,
    pub audio: AudioPolicy,
    pub audio_url_expires: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: crate::client::DEFAULT_PROGRAM.to_string(),
            bridge_script: DEFAULT_BRIDGE_PATH.to_string(),
            call_timeout: None,
            respawn: RespawnPolicy::default(),
            audio: AudioPolicy::default(),
            audio_url_expires: DEFAULT_AUDIO_URL_EXPIRES,
        }
    }
}

impl SimulatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`.
    ///
    /// Unset and blank variables take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let enabled = match get("SIMULATOR_ENABLED") {
            Some(v) => parse_bool("SIMULATOR_ENABLED", &v)?,
            None => defaults.enabled,
        };
        let audio_disabled = match get("LONGFORM_AUDIO_BASE64_DISABLED") {
            Some(v) => parse_bool("LONGFORM_AUDIO_BASE64_DISABLED", &v)?,
            None => defaults.audio.disabled,
        };

        let millis = |key: &str| -> Result<Option<Duration>> {
            get(key)
                .map(|v| parse_number::<u64>(key, &v).map(Duration::from_millis))
                .transpose()
        };

        Ok(Self {
            enabled,
            program: get("SIMULATOR_PYTHON").unwrap_or(defaults.program),
            bridge_script: get("SIMULATOR_BRIDGE").unwrap_or(defaults.bridge_script),
            call_timeout: millis("SIMULATOR_CALL_TIMEOUT_MS")?,
            respawn: RespawnPolicy {
                backoff: millis("SIMULATOR_RESPAWN_BACKOFF_MS")?,
                max_consecutive_failures: get("SIMULATOR_MAX_CONSECUTIVE_FAILURES")
                    .map(|v| parse_number("SIMULATOR_MAX_CONSECUTIVE_FAILURES", &v))
                    .transpose()?,
            },
            audio: AudioPolicy {
                disabled: audio_disabled,
                max_len: get("LONGFORM_AUDIO_BASE64_MAX_LEN")
                    .map(|v| parse_number("LONGFORM_AUDIO_BASE64_MAX_LEN", &v))
                    .transpose()?
                    .unwrap_or(defaults.audio.max_len),
            },
            audio_url_expires: get("SIMULATOR_AUDIO_URL_EXPIRES_SECS")
                .map(|v| parse_number("SIMULATOR_AUDIO_URL_EXPIRES_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.audio_url_expires),
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SimulatorError::Config(format!("{}: expected a boolean, got {:?}", key, value))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SimulatorError::Config(format!("{}: expected a number, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SimulatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SimulatorConfig::default());
        assert!(config.enabled);
        assert_eq!(config.program, "python");
        assert_eq!(config.bridge_script, DEFAULT_BRIDGE_PATH);
        assert_eq!(config.audio.max_len, 500_000);
        assert_eq!(config.audio_url_expires, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let config = SimulatorConfig::from_lookup(lookup(&[
            ("SIMULATOR_ENABLED", "false"),
            ("SIMULATOR_PYTHON", "python3"),
            ("SIMULATOR_BRIDGE", "/opt/bridge.py"),
            ("SIMULATOR_CALL_TIMEOUT_MS", "30000"),
            ("SIMULATOR_RESPAWN_BACKOFF_MS", "250"),
            ("SIMULATOR_MAX_CONSECUTIVE_FAILURES", "5"),
            ("LONGFORM_AUDIO_BASE64_DISABLED", "true"),
            ("LONGFORM_AUDIO_BASE64_MAX_LEN", "1000"),
            ("SIMULATOR_AUDIO_URL_EXPIRES_SECS", "300"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.program, "python3");
        assert_eq!(config.bridge_script, "/opt/bridge.py");
        assert_eq!(config.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.respawn.backoff, Some(Duration::from_millis(250)));
        assert_eq!(config.respawn.max_consecutive_failures, Some(5));
        assert!(config.audio.disabled);
        assert_eq!(config.audio.max_len, 1000);
        assert_eq!(config.audio_url_expires, Duration::from_secs(300));
    }

    #[test]
    fn test_blank_is_default() {
        let config = SimulatorConfig::from_lookup(lookup(&[("SIMULATOR_PYTHON", "  ")])).unwrap();
        assert_eq!(config.program, "python");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SimulatorConfig::from_lookup(lookup(&[("SIMULATOR_ENABLED", "maybe")])).unwrap_err();
        assert_eq!(err.code(), "SIMULATOR_CONFIG");

        let err = SimulatorConfig::from_lookup(lookup(&[("SIMULATOR_CALL_TIMEOUT_MS", "-1")])).unwrap_err();
        assert!(err.to_string().contains("SIMULATOR_CALL_TIMEOUT_MS"));
    }

    #[test]
    fn test_audio_policy() {
        let policy = AudioPolicy {
            disabled: false,
            max_len: 4,
        };
        assert_eq!(policy.filter(Some("AAAA".into())).as_deref(), Some("AAAA"));
        assert_eq!(policy.filter(Some("AAAAA".into())), None);
        assert_eq!(policy.filter(None), None);

        let disabled = AudioPolicy {
            disabled: true,
            ..AudioPolicy::default()
        };
        assert_eq!(disabled.filter(Some("AAAA".into())), None);
    }
}
