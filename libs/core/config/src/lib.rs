//! Environment-driven configuration shared by the newsdesk services.

pub mod redis;
pub mod tracing;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Deployment environment, selected by `APP_ENV`.
///
/// Anything other than `production`/`prod` (any case) is development.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn from_env() -> Self {
        env::var("APP_ENV")
            .map(|v| Self::parse(&v))
            .unwrap_or(Environment::Development)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Value of `key`, or `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Value of `key`; `MissingEnvVar` when unset
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an environment variable, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean flag: `true`/`1`/`yes` or `false`/`0`/`no`
pub fn env_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::ParseError {
                key: key.to_string(),
                details: format!("expected a boolean, got '{}'", other),
            }),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse(" PROD "), Environment::Production);
        assert_eq!(Environment::parse("staging"), Environment::Development);
        assert_eq!(Environment::parse(""), Environment::Development);
    }

    #[test]
    fn test_environment_from_env() {
        temp_env::with_var_unset("APP_ENV", || {
            assert!(Environment::from_env().is_development());
        });
        temp_env::with_var("APP_ENV", Some("Production"), || {
            assert!(Environment::from_env().is_production());
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("EMAIL_QUEUE", Some("email-queue-staging"), || {
            assert_eq!(env_or_default("EMAIL_QUEUE", "email-queue"), "email-queue-staging");
        });
        temp_env::with_var_unset("EMAIL_QUEUE", || {
            assert_eq!(env_or_default("EMAIL_QUEUE", "email-queue"), "email-queue");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("SMTP_HOST", || {
            let err = env_required("SMTP_HOST").unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "SMTP_HOST"));
            assert!(err.to_string().contains("SMTP_HOST"));
        });
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("WORKER_CONCURRENCY", Some(" 8 "), || {
            assert_eq!(env_parse("WORKER_CONCURRENCY", 1usize).unwrap(), 8);
        });
        temp_env::with_var_unset("WORKER_CONCURRENCY", || {
            assert_eq!(env_parse("WORKER_CONCURRENCY", 1usize).unwrap(), 1);
        });
        temp_env::with_var("WORKER_CONCURRENCY", Some("many"), || {
            let err = env_parse("WORKER_CONCURRENCY", 1usize).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "WORKER_CONCURRENCY"));
        });
        temp_env::with_var("HEALTH_PORT", Some("99999"), || {
            assert!(env_parse::<u16>("HEALTH_PORT", 8082).is_err());
        });
    }

    #[test]
    fn test_env_flag() {
        temp_env::with_var("SMTP_USE_TLS", Some("YES"), || {
            assert!(env_flag("SMTP_USE_TLS", false).unwrap());
        });
        temp_env::with_var("SMTP_USE_TLS", Some("0"), || {
            assert!(!env_flag("SMTP_USE_TLS", true).unwrap());
        });
        temp_env::with_var("SMTP_USE_TLS", Some("maybe"), || {
            assert!(env_flag("SMTP_USE_TLS", false).is_err());
        });
    }
}
