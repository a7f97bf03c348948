use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use statreg_core::context::ImportSettings;

/// Worker configuration loaded from environment variables.
///
/// Everything except `DATABASE_URL` has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Base URL of the Elasticsearch-compatible search service.
    pub search_index_url: String,
    pub search_index_name: String,
    pub search_timeout: Duration,
    pub dequeue_interval: Duration,
    pub stuck_sweep_interval: Duration,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
    pub import: ImportSettings,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} must be a valid number: {e}")),
        None => Ok(default),
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `DATABASE_URL`              | required                |
    /// | `DB_MAX_CONNECTIONS`        | `5`                     |
    /// | `SEARCH_INDEX_URL`          | `http://localhost:9200` |
    /// | `SEARCH_INDEX_NAME`         | `statunits`             |
    /// | `SEARCH_TIMEOUT_SECS`       | `30`                    |
    /// | `DEQUEUE_INTERVAL_MS`       | `1000`                  |
    /// | `STUCK_SWEEP_INTERVAL_SECS` | `60`                    |
    /// | `STUCK_TIMEOUT_SECS`        | `3600`                  |
    /// | `BULK_BUFFER_SIZE`          | `500`                   |
    /// | `LOG_BUFFER_SIZE`           | `200`                   |
    /// | `FLUSH_MAX_ATTEMPTS`        | `3`                     |
    /// | `FLUSH_RETRY_DELAY_MS`      | `500`                   |
    /// | `LIQUIDATED_STATUS_CODE`    | `7`                     |
    /// | `IMPORT_USER_ID`            | `import-service`        |
    /// | `INDEX_PENDING_LIMIT`       | `10000`                 |
    /// | `LOG_FORMAT`                | `text` (`json` to switch) |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let defaults = ImportSettings::default();

        let bulk_buffer_size: usize = parse_or(&lookup, "BULK_BUFFER_SIZE", defaults.bulk_buffer_size)?;
        if bulk_buffer_size == 0 {
            return Err(anyhow!("BULK_BUFFER_SIZE must be at least 1"));
        }
        let flush_max_attempts: u32 = parse_or(&lookup, "FLUSH_MAX_ATTEMPTS", defaults.flush_max_attempts)?;
        if flush_max_attempts == 0 {
            return Err(anyhow!("FLUSH_MAX_ATTEMPTS must be at least 1"));
        }

        let import = ImportSettings {
            bulk_buffer_size,
            log_buffer_size: parse_or(&lookup, "LOG_BUFFER_SIZE", defaults.log_buffer_size)?,
            flush_max_attempts,
            flush_retry_delay: Duration::from_millis(parse_or(&lookup, "FLUSH_RETRY_DELAY_MS", 500)?),
            liquidated_status_code: lookup("LIQUIDATED_STATUS_CODE").unwrap_or(defaults.liquidated_status_code),
            stuck_timeout: Duration::from_secs(parse_or(&lookup, "STUCK_TIMEOUT_SECS", 3600)?),
            default_user_id: lookup("IMPORT_USER_ID").unwrap_or(defaults.default_user_id),
            index_pending_limit: parse_or(&lookup, "INDEX_PENDING_LIMIT", defaults.index_pending_limit)?,
        };

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            search_index_url: lookup("SEARCH_INDEX_URL").unwrap_or_else(|| "http://localhost:9200".into()),
            search_index_name: lookup("SEARCH_INDEX_NAME").unwrap_or_else(|| "statunits".into()),
            search_timeout: Duration::from_secs(parse_or(&lookup, "SEARCH_TIMEOUT_SECS", 30)?),
            dequeue_interval: Duration::from_millis(parse_or(&lookup, "DEQUEUE_INTERVAL_MS", 1000)?),
            stuck_sweep_interval: Duration::from_secs(parse_or(&lookup, "STUCK_SWEEP_INTERVAL_SECS", 60)?),
            log_json: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            import,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<WorkerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/statreg")]).unwrap();
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.search_index_name, "statunits");
        assert_eq!(config.dequeue_interval, Duration::from_secs(1));
        assert_eq!(config.stuck_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.import.bulk_buffer_size, 500);
        assert_eq!(config.import.liquidated_status_code, "7");
        assert_eq!(config.import.default_user_id, "import-service");
        assert_eq!(config.import.index_pending_limit, 10_000);
        assert!(!config.log_json);
    }

    #[test]
    fn overrides_apply() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/statreg"),
            ("BULK_BUFFER_SIZE", "50"),
            ("FLUSH_RETRY_DELAY_MS", "20"),
            ("LIQUIDATED_STATUS_CODE", "9"),
            ("LOG_FORMAT", "JSON"),
            ("INDEX_PENDING_LIMIT", "25"),
        ])
        .unwrap();
        assert_eq!(config.import.index_pending_limit, 25);
        assert_eq!(config.import.bulk_buffer_size, 50);
        assert_eq!(config.import.flush_retry_delay, Duration::from_millis(20));
        assert_eq!(config.import.liquidated_status_code, "9");
        assert!(config.log_json);
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = load(&[("DATABASE_URL", "x"), ("DB_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));

        let err = load(&[("DATABASE_URL", "x"), ("BULK_BUFFER_SIZE", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
