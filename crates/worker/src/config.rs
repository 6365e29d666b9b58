use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use idp_core::operations::retention::{DEFAULT_RETENTION_DAYS, DEFAULT_STALE_RUNNING_FACTOR};
use idp_core::operations::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

/// Errors produced while reading [`WorkerConfig`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Scratch directory commands run in (default: the OS temp dir).
    pub work_dir: PathBuf,
    /// Jobs processed concurrently (default: `4`).
    pub concurrency: usize,
    /// Bounded job queue capacity (default: `1024`).
    pub queue_capacity: usize,
    /// Terminal executions older than this are deleted (default: `30`).
    pub retention_days: i64,
    /// How often the retention sweep runs (default: daily).
    pub sweep_interval: Duration,
    /// How often pending submissions are polled (default: `2s`).
    pub poll_interval: Duration,
    /// First retry backoff delay (default: `1000ms`).
    pub retry_base_delay: Duration,
    /// Upper bound for a single retry delay (default: `60000ms`).
    pub retry_max_delay: Duration,
    /// Multiplier on a template's worst-case run time before a `running`
    /// execution is considered abandoned (default: `2`).
    pub stale_running_factor: i64,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default          |
    /// |------------------------|------------------|
    /// | `DATABASE_URL`         | (required)       |
    /// | `WORK_DIR`             | OS temp dir      |
    /// | `WORKER_CONCURRENCY`   | `4`              |
    /// | `QUEUE_CAPACITY`       | `1024`           |
    /// | `RETENTION_DAYS`       | `30`             |
    /// | `SWEEP_INTERVAL_SECS`  | `86400`          |
    /// | `POLL_INTERVAL_MS`     | `2000`           |
    /// | `RETRY_BASE_DELAY_MS`  | `1000`           |
    /// | `RETRY_MAX_DELAY_MS`   | `60000`          |
    /// | `STALE_RUNNING_FACTOR` | `2`              |
    /// | `LOG_FORMAT`           | `pretty`         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let work_dir = lookup("WORK_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let concurrency: usize = parse_var(&lookup, "WORKER_CONCURRENCY", 4)?;
        let queue_capacity: usize = parse_var(&lookup, "QUEUE_CAPACITY", 1024)?;
        let retention_days: i64 = parse_var(&lookup, "RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?;
        let sweep_interval_secs: u64 = parse_var(&lookup, "SWEEP_INTERVAL_SECS", 86_400)?;
        let poll_interval_ms: u64 = parse_var(&lookup, "POLL_INTERVAL_MS", 2_000)?;
        let retry_base_delay_ms: u64 = parse_var(
            &lookup,
            "RETRY_BASE_DELAY_MS",
            DEFAULT_BASE_DELAY.as_millis() as u64,
        )?;
        let retry_max_delay_ms: u64 = parse_var(
            &lookup,
            "RETRY_MAX_DELAY_MS",
            DEFAULT_MAX_DELAY.as_millis() as u64,
        )?;
        let stale_running_factor: i64 =
            parse_var(&lookup, "STALE_RUNNING_FACTOR", DEFAULT_STALE_RUNNING_FACTOR)?;
        let log_format: LogFormat = parse_var(&lookup, "LOG_FORMAT", LogFormat::Pretty)?;

        ensure_positive("WORKER_CONCURRENCY", concurrency as u64)?;
        ensure_positive("QUEUE_CAPACITY", queue_capacity as u64)?;
        ensure_positive("RETENTION_DAYS", retention_days.max(0) as u64)?;
        ensure_positive("SWEEP_INTERVAL_SECS", sweep_interval_secs)?;
        ensure_positive("POLL_INTERVAL_MS", poll_interval_ms)?;
        ensure_positive("STALE_RUNNING_FACTOR", stale_running_factor.max(0) as u64)?;

        Ok(Self {
            database_url,
            work_dir,
            concurrency,
            queue_capacity,
            retention_days,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(retry_max_delay_ms.max(retry_base_delay_ms)),
            stale_running_factor,
            log_format,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(default),
    }
}

fn ensure_positive(var: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/idp")]).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.sweep_interval, Duration::from_secs(86_400));
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(60));
        assert_eq!(config.stale_running_factor, 2);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.work_dir, std::env::temp_dir());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/idp"),
            ("WORKER_CONCURRENCY", "8"),
            ("RETENTION_DAYS", "7"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("LOG_FORMAT", "JSON"),
            ("WORK_DIR", "/var/lib/idp"),
        ])
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/idp"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://db"), ("WORKER_CONCURRENCY", "many")]),
            Err(ConfigError::Invalid { var: "WORKER_CONCURRENCY", .. })
        );
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://db"), ("QUEUE_CAPACITY", "0")]),
            Err(ConfigError::Invalid { var: "QUEUE_CAPACITY", .. })
        );
        assert_matches!(
            load(&[("DATABASE_URL", "postgres://db"), ("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { var: "LOG_FORMAT", .. })
        );
    }
}
