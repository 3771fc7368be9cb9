use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use pulse_providers::{PollPolicy, ProvidersConfig};

use crate::dispatcher::DispatcherConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub queue_url: String,
    pub dead_letter_queue_url: Option<String>,
    pub aws_region: String,
    /// Custom AWS endpoint (LocalStack and the like).
    pub aws_endpoint_url: Option<String>,
    pub s3_bucket: String,
    pub dispatcher: DispatcherConfig,
    pub providers: ProvidersConfig,
    /// Lifetime of the signed URL stored on completed jobs.
    pub artifact_url_ttl: Duration,
    pub status_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                        |
    /// |-----------------------------|--------------------------------|
    /// | `DATABASE_URL`              | required                       |
    /// | `DB_MAX_CONNECTIONS`        | `5`                            |
    /// | `SQS_QUEUE_URL`             | required                       |
    /// | `SQS_DEAD_LETTER_QUEUE_URL` | unset (dead letters dropped)   |
    /// | `AWS_REGION`                | `eu-central-1`                 |
    /// | `AWS_ENDPOINT_URL`          | unset                          |
    /// | `S3_BUCKET_NAME`            | `pulse-dev-exports`            |
    /// | `MAX_IN_FLIGHT`             | `1`                            |
    /// | `QUEUE_WAIT_SECS`           | `20`                           |
    /// | `VISIBILITY_TIMEOUT_SECS`   | `300`                          |
    /// | `VISIBILITY_HEARTBEAT`      | `true`                         |
    /// | `MAX_RECEIVE_COUNT`         | `5`                            |
    /// | `SHUTDOWN_GRACE_SECS`       | `30`                           |
    /// | `POLL_MAX_ATTEMPTS`         | `60`                           |
    /// | `POLL_INTERVAL_SECS`        | `5`                            |
    /// | `RUNWAY_API_KEY`            | unset (mock fallback)          |
    /// | `RUNWAY_BASE_URL`           | `https://api.runwayml.com`     |
    /// | `PIKA_API_KEY`              | unset (mock fallback)          |
    /// | `PIKA_BASE_URL`             | `https://api.pika.art`         |
    /// | `MOCK_SEED`                 | `0`                            |
    /// | `ARTIFACT_URL_TTL_SECS`     | `86400`                        |
    /// | `STATUS_ADDR`               | `0.0.0.0:8081`                 |
    /// | `LOG_FORMAT`                | `text`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = ProvidersConfig::default();
        let dispatcher_defaults = DispatcherConfig::default();

        let providers = ProvidersConfig {
            runway_api_key: env.optional("RUNWAY_API_KEY"),
            runway_base_url: env.optional("RUNWAY_BASE_URL").unwrap_or(defaults.runway_base_url),
            pika_api_key: env.optional("PIKA_API_KEY"),
            pika_base_url: env.optional("PIKA_BASE_URL").unwrap_or(defaults.pika_base_url),
            mock_seed: env.parse("MOCK_SEED", 0u64)?,
            poll: PollPolicy {
                max_attempts: env.positive("POLL_MAX_ATTEMPTS", 60u32)?,
                interval: env.secs("POLL_INTERVAL_SECS", 5)?,
            },
            retry: defaults.retry,
        };

        let dispatcher = DispatcherConfig {
            max_in_flight: env.positive("MAX_IN_FLIGHT", 1usize)?,
            wait_time: env.secs("QUEUE_WAIT_SECS", 20)?,
            visibility_timeout: Duration::from_secs(env.positive("VISIBILITY_TIMEOUT_SECS", 300u64)?),
            visibility_heartbeat: env.flag("VISIBILITY_HEARTBEAT", true)?,
            max_receive_count: env.positive("MAX_RECEIVE_COUNT", 5u32)?,
            shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", 30)?,
            backoff: dispatcher_defaults.backoff,
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            db_max_connections: env.positive("DB_MAX_CONNECTIONS", 5u32)?,
            queue_url: env.required("SQS_QUEUE_URL")?,
            dead_letter_queue_url: env.optional("SQS_DEAD_LETTER_QUEUE_URL"),
            aws_region: env.optional("AWS_REGION").unwrap_or_else(|| "eu-central-1".into()),
            aws_endpoint_url: env.optional("AWS_ENDPOINT_URL"),
            s3_bucket: env
                .optional("S3_BUCKET_NAME")
                .unwrap_or_else(|| "pulse-dev-exports".into()),
            dispatcher,
            providers,
            artifact_url_ttl: env.secs("ARTIFACT_URL_TTL_SECS", 24 * 60 * 60)?,
            status_addr: env.parse("STATUS_ADDR", SocketAddr::from(([0, 0, 0, 0], 8081)))?,
            log_format: env.parse("LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

// ---- private helpers ----

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + Display,
        T::Err: Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                name,
                value: value.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(value)
    }

    fn secs(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default).map(Duration::from_secs)
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(name) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value,
                    reason: "expected a boolean".into(),
                }),
            },
        }
    }
}
