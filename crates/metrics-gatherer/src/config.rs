//! Service configuration
//!
//! Built once in `main` from environment variables and passed by reference
//! to every component. Nothing below `main` reads the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |---|---|
//! | `ES_HOSTS` | `http://localhost:9200` |
//! | `ES_USER` / `ES_PASSWORD` | empty |
//! | `POSTGRES_HOST` / `POSTGRES_PORT` | `localhost` / `5432` |
//! | `POSTGRES_USER` / `POSTGRES_PASSWORD` | empty |
//! | `POSTGRES_DB` | `reportportal` |
//! | `AMQP_URL` | empty (model retirement disabled) |
//! | `AMQP_VIRTUAL_HOST` | `analyzer` |
//! | `AMQP_EXCHANGE_NAME` | `analyzer` |
//! | `AMQP_REPLY_TIMEOUT_SECS` | `120` |
//! | `ALLOWED_START_TIME` / `ALLOWED_END_TIME` | `22:00` / `08:00` |
//! | `TIME_INTERVAL` | `hour` (`minute`, `day`) |
//! | `MAX_DAYS_STORE` | `500` |
//! | `AUTO_ANALYSIS_MODEL_REMOVE_POLICY` | `f1-score<=80\|percent_not_found_aa>70` |
//! | `SUGGEST_MODEL_REMOVE_POLICY` | `reciprocalRank<=80\|notFoundResults>70` |
//! | `METRICS_HTTP_PORT` | `5000` |
//! | `LOGGING_LEVEL` | `debug` |

use crate::es_client::redact_url;
use chrono::NaiveTime;
use metrics_core::{AllowedWindow, TimeInterval};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Elasticsearch connection settings.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// Postgres connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl PostgresConfig {
    /// Key/value connection string for `tokio_postgres::connect`.
    pub fn connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", self.host),
            format!("port={}", self.port),
            format!("dbname={}", self.database),
        ];
        if !self.user.is_empty() {
            parts.push(format!("user={}", self.user));
        }
        if !self.password.is_empty() {
            parts.push(format!("password={}", self.password));
        }
        parts.join(" ")
    }
}

/// Model service broker settings.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    /// Full broker URL including the virtual host; `None` when not configured.
    pub url: Option<String>,
    pub exchange: String,
    pub reply_timeout: Duration,
}

/// When and how often gathering cycles run.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub allowed_window: AllowedWindow,
    pub interval: TimeInterval,
    pub max_days_store: i64,
}

/// Retirement rule text per model type.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub auto_analysis: String,
    pub suggest: String,
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct GathererConfig {
    pub elastic: ElasticConfig,
    pub postgres: PostgresConfig,
    pub amqp: AmqpConfig,
    pub schedule: ScheduleConfig,
    pub policies: PolicyConfig,
    pub http_port: u16,
    pub log_level: String,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn trim_slashes(raw: &str) -> String {
    raw.trim().trim_end_matches(['/', '\\']).to_string()
}

impl GathererConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let allowed_window = {
            let start = var("ALLOWED_START_TIME", "22:00");
            let end = var("ALLOWED_END_TIME", "08:00");
            AllowedWindow::parse(&start, &end).unwrap_or_else(|| {
                warn!(start = %start, end = %end, "Unparsable allowed window, using 22:00-08:00");
                AllowedWindow::new(
                    NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
                    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
                )
            })
        };

        let amqp_url = {
            let base = trim_slashes(&var("AMQP_URL", ""));
            if base.is_empty() {
                None
            } else {
                Some(format!("{}/{}", base, var("AMQP_VIRTUAL_HOST", "analyzer")))
            }
        };

        Self {
            elastic: ElasticConfig {
                host: trim_slashes(&var("ES_HOSTS", "http://localhost:9200")),
                user: var("ES_USER", "").trim().to_string(),
                password: var("ES_PASSWORD", "").trim().to_string(),
            },
            postgres: PostgresConfig {
                host: var("POSTGRES_HOST", "localhost"),
                port: parse_or("POSTGRES_PORT", lookup("POSTGRES_PORT"), 5432),
                user: var("POSTGRES_USER", ""),
                password: var("POSTGRES_PASSWORD", ""),
                database: var("POSTGRES_DB", "reportportal"),
            },
            amqp: AmqpConfig {
                url: amqp_url,
                exchange: var("AMQP_EXCHANGE_NAME", "analyzer"),
                reply_timeout: Duration::from_secs(parse_or(
                    "AMQP_REPLY_TIMEOUT_SECS",
                    lookup("AMQP_REPLY_TIMEOUT_SECS"),
                    120,
                )),
            },
            schedule: ScheduleConfig {
                allowed_window,
                interval: TimeInterval::parse_or_default(&var("TIME_INTERVAL", "hour")),
                max_days_store: retention_days(lookup("MAX_DAYS_STORE")),
            },
            policies: PolicyConfig {
                auto_analysis: var(
                    "AUTO_ANALYSIS_MODEL_REMOVE_POLICY",
                    "f1-score<=80|percent_not_found_aa>70",
                ),
                suggest: var(
                    "SUGGEST_MODEL_REMOVE_POLICY",
                    "reciprocalRank<=80|notFoundResults>70",
                ),
            },
            http_port: parse_or("METRICS_HTTP_PORT", lookup("METRICS_HTTP_PORT"), 5000),
            log_level: var("LOGGING_LEVEL", "debug").to_lowercase(),
        }
    }

    /// Whether model retirement can reach the model service at all.
    pub fn retirement_enabled(&self) -> bool {
        self.amqp.url.is_some()
    }

    /// `tracing` filter directive for `LOGGING_LEVEL`.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.as_str() {
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            _ => "info",
        }
    }

    /// Elasticsearch host with credentials removed, for logs.
    pub fn elastic_host_for_logs(&self) -> String {
        redact_url(&self.elastic.host)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %value, default = %default, "Unparsable setting, using default");
            default
        }),
    }
}

/// Longest retention accepted, about a hundred years.
const MAX_RETENTION_DAYS: i64 = 36_500;

fn retention_days(raw: Option<String>) -> i64 {
    const DEFAULT: i64 = 500;
    let days = parse_or("MAX_DAYS_STORE", raw, DEFAULT);
    if (1..=MAX_RETENTION_DAYS).contains(&days) {
        days
    } else {
        warn!(
            key = "MAX_DAYS_STORE",
            value = days,
            default = DEFAULT,
            "Retention outside 1..={}, using default",
            MAX_RETENTION_DAYS
        );
        DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> GathererConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GathererConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = GathererConfig::default();
        assert_eq!(config.elastic.host, "http://localhost:9200");
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.postgres.database, "reportportal");
        assert_eq!(config.schedule.max_days_store, 500);
        assert_eq!(config.schedule.interval, TimeInterval::Hour);
        assert_eq!(config.schedule.allowed_window.to_string(), "22:00-08:00");
        assert_eq!(config.amqp.reply_timeout, Duration::from_secs(120));
        assert_eq!(config.policies.auto_analysis, "f1-score<=80|percent_not_found_aa>70");
        assert_eq!(config.http_port, 5000);
        assert!(!config.retirement_enabled());
    }

    #[test]
    fn test_amqp_url_joins_virtual_host() {
        let config = config_from(&[
            ("AMQP_URL", "amqp://rabbit:secret@mq:5672/"),
            ("AMQP_VIRTUAL_HOST", "analyzer"),
        ]);
        assert_eq!(
            config.amqp.url.as_deref(),
            Some("amqp://rabbit:secret@mq:5672/analyzer")
        );
        assert!(config.retirement_enabled());
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let config = config_from(&[
            ("POSTGRES_PORT", "fivefour"),
            ("MAX_DAYS_STORE", " 30 "),
            ("ALLOWED_START_TIME", "late"),
            ("TIME_INTERVAL", "Day"),
        ]);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.schedule.max_days_store, 30);
        assert_eq!(config.schedule.allowed_window.to_string(), "22:00-08:00");
        assert_eq!(config.schedule.interval, TimeInterval::Day);
    }

    #[test]
    fn test_out_of_range_retention_falls_back() {
        for raw in ["-5", "0", "100000000"] {
            let config = config_from(&[("MAX_DAYS_STORE", raw)]);
            assert_eq!(config.schedule.max_days_store, 500, "MAX_DAYS_STORE={raw}");
        }
        let config = config_from(&[("MAX_DAYS_STORE", "1")]);
        assert_eq!(config.schedule.max_days_store, 1);
    }

    #[test]
    fn test_postgres_connection_string_omits_empty_credentials() {
        let config = config_from(&[("POSTGRES_HOST", "db")]);
        assert_eq!(
            config.postgres.connection_string(),
            "host=db port=5432 dbname=reportportal"
        );
    }

    #[test]
    fn test_log_filter_mapping() {
        assert_eq!(config_from(&[("LOGGING_LEVEL", "INFO")]).log_filter(), "info");
        assert_eq!(config_from(&[]).log_filter(), "debug");
        assert_eq!(config_from(&[("LOGGING_LEVEL", "loud")]).log_filter(), "info");
    }

    #[test]
    fn test_elastic_host_redacted_for_logs() {
        let config = config_from(&[("ES_HOSTS", "https://elastic:pass@es:9200/")]);
        assert_eq!(config.elastic.host, "https://elastic:pass@es:9200");
        assert_eq!(config.elastic_host_for_logs(), "https://es:9200");
    }
}
