//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Deployment environment. Internal endpoints skip the shared-secret check
/// outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "test" => Ok(Self::Development),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// HTTP server and persistence settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub environment: Environment,
    /// Shared secret for `POST /agent/jobs/process`.
    pub internal_secret: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/planner.db"),
            environment: Environment::Development,
            internal_secret: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PLANNER_PORT", defaults.port),
            db_path: std::env::var("PLANNER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            environment: env_parse("PLANNER_ENV", defaults.environment),
            internal_secret: std::env::var("PLANNER_INTERNAL_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        }
    }

    /// Reject settings that would leave internal endpoints open in production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PLANNER_PORT".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }
        if self.environment.is_production() && self.internal_secret.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "PLANNER_INTERNAL_SECRET".to_string(),
            ));
        }
        Ok(())
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Longest accepted request input, in characters.
    pub max_input_chars: usize,
    /// Upper bound on a single classification call.
    pub classifier_timeout: Duration,
    /// `max_retries` stamped on new jobs.
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 4000,
            classifier_timeout: Duration::from_secs(20),
            max_retries: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_input_chars: env_parse("PLANNER_MAX_INPUT_CHARS", defaults.max_input_chars),
            classifier_timeout: Duration::from_secs(env_parse(
                "PLANNER_CLASSIFIER_TIMEOUT_SECS",
                defaults.classifier_timeout.as_secs(),
            )),
            max_retries: env_parse("PLANNER_MAX_RETRIES", defaults.max_retries),
        }
    }
}

/// Job processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Tick interval of each poll loop.
    pub poll_interval: Duration,
    /// Claims attempted per tick before yielding.
    pub batch_size: usize,
    /// How often the stale-claim sweep runs.
    pub sweep_interval: Duration,
    /// Claims older than this are presumed abandoned.
    pub stale_timeout: Duration,
    /// First retry delay.
    pub retry_base: Duration,
    /// Retry delay ceiling.
    pub retry_cap: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 5,
            sweep_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(300), // 5 minutes
            retry_base: Duration::from_millis(1000),
            retry_cap: Duration::from_millis(30_000),
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(env_parse(
                "PLANNER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            batch_size: env_parse("PLANNER_BATCH_SIZE", defaults.batch_size).max(1),
            sweep_interval: Duration::from_secs(env_parse(
                "PLANNER_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            stale_timeout: Duration::from_secs(env_parse(
                "PLANNER_STALE_TIMEOUT_SECS",
                defaults.stale_timeout.as_secs(),
            )),
            ..defaults
        }
    }

    /// Reject periods that `tokio::time::interval` cannot tick on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("PLANNER_POLL_INTERVAL_MS", self.poll_interval),
            ("PLANNER_SWEEP_INTERVAL_SECS", self.sweep_interval),
            ("PLANNER_STALE_TIMEOUT_SECS", self.stale_timeout),
        ];
        for (key, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_defaults_match_retry_contract() {
        let config = ProcessorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.stale_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_base, Duration::from_millis(1000));
        assert_eq!(config.retry_cap, Duration::from_millis(30_000));
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(
            "Development".parse::<Environment>(),
            Ok(Environment::Development)
        );
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn production_requires_internal_secret() {
        let mut config = ServerConfig {
            environment: Environment::Production,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEnvVar(_))));

        config.internal_secret = Some(SecretString::from("s3cret"));
        assert!(config.validate().is_ok());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn processor_rejects_zero_periods() {
        assert!(ProcessorConfig::default().validate().is_ok());

        let zero_poll = ProcessorConfig {
            poll_interval: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        match zero_poll.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "PLANNER_POLL_INTERVAL_MS"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }

        let zero_sweep = ProcessorConfig {
            sweep_interval: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        assert!(zero_sweep.validate().is_err());
    }

    #[test]
    fn env_parse_falls_back_on_missing_key() {
        let value: u16 = env_parse("PLANNER_TEST_DEFINITELY_UNSET_KEY", 42);
        assert_eq!(value, 42);
    }
}
