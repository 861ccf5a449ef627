//! Configuration loading from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::jobs::{RejectionPolicy, RetryPolicy};
use crate::mail::SmtpConfig;
use crate::push::PushConfig;
use crate::push::gateway::DEFAULT_SECRET_HEADER;

const DEV_PUSH_SECRET: &str = "pushdeck-dev-secret";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{key} is required when {because} is set")]
    Missing {
        key: &'static str,
        because: &'static str,
    },
}

/// Process configuration shared by the API and worker binaries.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` selects the in-memory backends
    pub database_url: Option<String>,
    pub push: PushConfig,
    pub rejection_policy: RejectionPolicy,
    /// `None` when no relay is configured; mail is then only logged
    pub smtp: Option<SmtpConfig>,
    pub worker_concurrency: usize,
    pub job_max_attempts: u32,
    pub api_bind: SocketAddr,
    /// JSON fixture loaded into the in-memory backends at startup
    pub dev_seed_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let shared_secret = match get("PUSH_SHARED_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("PUSH_SHARED_SECRET not set; using the development secret");
                DEV_PUSH_SECRET.to_string()
            }
        };
        let push = PushConfig::new(shared_secret)
            .with_secret_header(
                get("PUSH_SECRET_HEADER").unwrap_or_else(|| DEFAULT_SECRET_HEADER.to_string()),
            )
            .with_timeout(Duration::from_secs(parse(
                "PUSH_TIMEOUT_SECS",
                get("PUSH_TIMEOUT_SECS"),
                10u64,
            )?));

        let rejection_policy = match get("PUSH_REJECTION_POLICY").as_deref() {
            None | Some("complete") => RejectionPolicy::Complete,
            Some("fail") => RejectionPolicy::Fail,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "PUSH_REJECTION_POLICY",
                    value: other.to_string(),
                });
            }
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse("SMTP_PORT", get("SMTP_PORT"), 587u16)?,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                from: get("SMTP_FROM").ok_or(ConfigError::Missing {
                    key: "SMTP_FROM",
                    because: "SMTP_HOST",
                })?,
                tls: parse_bool("SMTP_TLS", get("SMTP_TLS"), true)?,
            }),
            None => None,
        };

        let worker_concurrency = parse("WORKER_CONCURRENCY", get("WORKER_CONCURRENCY"), 4usize)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }
        let job_max_attempts = parse("JOB_MAX_ATTEMPTS", get("JOB_MAX_ATTEMPTS"), 5u32)?;
        if job_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "JOB_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            push,
            rejection_policy,
            smtp,
            worker_concurrency,
            job_max_attempts,
            api_bind: parse(
                "API_BIND",
                get("API_BIND"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            dev_seed_file: get("DEV_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.job_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid {
            key,
            value: raw.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.push.secret_header, "x-push-secret");
        assert_eq!(cfg.push.shared_secret, DEV_PUSH_SECRET);
        assert_eq!(cfg.push.timeout, Duration::from_secs(10));
        assert_eq!(cfg.rejection_policy, RejectionPolicy::Complete);
        assert!(cfg.smtp.is_none());
        assert_eq!(cfg.worker_concurrency, 4);
        assert_eq!(cfg.retry_policy().max_attempts, 5);
        assert_eq!(cfg.api_bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.dev_seed_file, None);

        let cfg = config(&[("DEV_SEED_FILE", "seed/dev.json")]).unwrap();
        assert_eq!(cfg.dev_seed_file, Some(PathBuf::from("seed/dev.json")));
    }

    #[test]
    fn smtp_block_is_read_together() {
        let cfg = config(&[
            ("SMTP_HOST", "smtp.example"),
            ("SMTP_PORT", "465"),
            ("SMTP_FROM", "noreply@pushdeck.example"),
            ("SMTP_TLS", "false"),
        ])
        .unwrap();
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.port, 465);
        assert!(!smtp.tls);
        assert_eq!(smtp.username, None);

        let err = config(&[("SMTP_HOST", "smtp.example")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "SMTP_FROM",
                because: "SMTP_HOST"
            }
        );
    }

    #[test]
    fn malformed_values_are_reported_with_their_key() {
        let err = config(&[("WORKER_CONCURRENCY", "many")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "many".into()
            }
        );

        assert!(config(&[("SMTP_HOST", "h"), ("SMTP_FROM", "a@b.c"), ("SMTP_TLS", "maybe")]).is_err());
        assert!(config(&[("PUSH_REJECTION_POLICY", "ignore")]).is_err());
        assert!(config(&[("JOB_MAX_ATTEMPTS", "0")]).is_err());
    }
}
