//! Process Configuration
//!
//! Settings come from the environment (and `.env`, loaded by `main`). Parsing
//! is a pure function over a lookup so it can be tested without touching the
//! process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use agent_core::provider::DEFAULT_MODEL;
use career_advisor::firecrawl;
use thiserror::Error;

const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the server needs to start
#[derive(Clone)]
pub struct Config {
    pub model_endpoint: String,
    pub model_api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub firecrawl_api_key: String,
    pub firecrawl_command: String,
    pub database_url: String,
    pub bind_addr: String,
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let model_endpoint = required("MODEL_ENDPOINT_URL")?;
        if !(model_endpoint.starts_with("http://") || model_endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: "MODEL_ENDPOINT_URL",
                reason: "expected an http(s) URL".into(),
            });
        }

        let model_api_key = required("MODEL_API_KEY")?;
        let firecrawl_api_key = required("FIRECRAWL_API_KEY")?;
        let database_url = required("DATABASE_URL")?;

        let max_iterations = parse_or("MAX_ITERATIONS", get("MAX_ITERATIONS"), DEFAULT_MAX_ITERATIONS)?;
        if max_iterations == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_ITERATIONS",
                reason: "must be at least 1".into(),
            });
        }

        let temperature = parse_or("TEMPERATURE", get("TEMPERATURE"), DEFAULT_TEMPERATURE)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid {
                name: "TEMPERATURE",
                reason: "must be between 0.0 and 2.0".into(),
            });
        }

        Ok(Self {
            model_endpoint,
            model_api_key,
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL.into()),
            max_tokens: parse_or("MAX_COMPLETION_TOKENS", get("MAX_COMPLETION_TOKENS"), DEFAULT_MAX_TOKENS)?,
            temperature,
            max_iterations,
            model_timeout: Duration::from_secs(positive_secs(
                "MODEL_TIMEOUT_SECS",
                get("MODEL_TIMEOUT_SECS"),
                DEFAULT_MODEL_TIMEOUT_SECS,
            )?),
            tool_timeout: Duration::from_secs(positive_secs(
                "TOOL_TIMEOUT_SECS",
                get("TOOL_TIMEOUT_SECS"),
                DEFAULT_TOOL_TIMEOUT_SECS,
            )?),
            firecrawl_api_key,
            firecrawl_command: get("FIRECRAWL_COMMAND").unwrap_or_else(|| firecrawl::DEFAULT_COMMAND.into()),
            database_url,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.map_or(Ok(default), |v| {
        v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("'{v}': {e}"),
        })
    })
}

fn positive_secs(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match parse_or(name, raw, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            reason: "must be at least 1 second".into(),
        }),
        secs => Ok(secs),
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("model_endpoint", &self.model_endpoint)
            .field("model_api_key", &"[REDACTED]")
            .field("model_name", &self.model_name)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_iterations", &self.max_iterations)
            .field("model_timeout", &self.model_timeout)
            .field("tool_timeout", &self.tool_timeout)
            .field("firecrawl_api_key", &"[REDACTED]")
            .field("firecrawl_command", &self.firecrawl_command)
            .field("database_url", &self.database_url)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("MODEL_ENDPOINT_URL", "https://pod.example.net/v1"),
            ("MODEL_API_KEY", "sk-model"),
            ("FIRECRAWL_API_KEY", "fc-secret"),
            ("DATABASE_URL", "sqlite://data/advisor.db"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()))
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = load(&base()).unwrap();
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 2048);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.model_timeout, Duration::from_secs(120));
        assert_eq!(config.tool_timeout, Duration::from_secs(60));
        assert_eq!(config.firecrawl_command, "npx -y firecrawl-mcp");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn missing_setting_is_named() {
        for key in ["MODEL_ENDPOINT_URL", "MODEL_API_KEY", "FIRECRAWL_API_KEY", "DATABASE_URL"] {
            let mut vars = base();
            vars.remove(key);
            let err = load(&vars).unwrap_err();
            assert_eq!(err, ConfigError::Missing(key));
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn blank_counts_as_missing() {
        let mut vars = base();
        vars.insert("MODEL_API_KEY", "   ");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("MODEL_API_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = base();
        vars.insert("MODEL_NAME", "gpt-4o-mini");
        vars.insert("MAX_ITERATIONS", "4");
        vars.insert("TOOL_TIMEOUT_SECS", "15");
        vars.insert("TEMPERATURE", "0.2");
        let config = load(&vars).unwrap();
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.tool_timeout, Duration::from_secs(15));
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_values_rejected() {
        let cases = [
            ("MAX_ITERATIONS", "0"),
            ("MAX_ITERATIONS", "many"),
            ("TEMPERATURE", "3.5"),
            ("TOOL_TIMEOUT_SECS", "0"),
            ("MAX_COMPLETION_TOKENS", "-1"),
            ("MODEL_ENDPOINT_URL", "pod.example.net"),
        ];
        for (key, value) in cases {
            let mut vars = base();
            vars.insert(key, value);
            match load(&vars) {
                Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, key),
                other => panic!("{key}={value} gave {other:?}"),
            }
        }
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", load(&base()).unwrap());
        assert!(!rendered.contains("sk-model"));
        assert!(!rendered.contains("fc-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
