//! Subscriber setup for binaries.
//!
//! `init_tracing` picks a filter and output format from the [`Environment`];
//! `RUST_LOG` replaces the filter and `LOG_FORMAT` (`json` or `pretty`) the
//! format.

use crate::Environment;
use std::env;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Flattened JSON lines without targets.
    Json,
    Pretty,
}

impl LogFormat {
    /// `LOG_FORMAT` when set to a known value, otherwise JSON in production.
    pub fn for_environment(environment: &Environment) -> Self {
        match env::var("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            Ok(v) if v == "json" => LogFormat::Json,
            Ok(v) if v == "pretty" => LogFormat::Pretty,
            _ if environment.is_production() => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Filter used when `RUST_LOG` is unset. Redis and SMTP client chatter is
/// kept a level above the application's.
pub fn default_filter(environment: &Environment) -> &'static str {
    match environment {
        Environment::Production => "info,redis=warn,lettre=warn",
        Environment::Development => "debug,redis=info,lettre=info,hyper=info",
    }
}

/// Install the color-eyre panic and report hooks.
///
/// Reports show the error location but not the environment section.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Initialize the global subscriber. A second call keeps the first one.
pub fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));
    let format = LogFormat::for_environment(environment);

    let registry = tracing_subscriber::registry()
        .with(tracing_error::ErrorLayer::default())
        .with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .try_init(),
    };

    match result {
        Ok(()) => info!(environment = ?environment, format = ?format, "Tracing initialized"),
        Err(_) => debug!("Tracing already initialized"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_follows_environment() {
        temp_env::with_var_unset("LOG_FORMAT", || {
            assert_eq!(LogFormat::for_environment(&Environment::Production), LogFormat::Json);
            assert_eq!(LogFormat::for_environment(&Environment::Development), LogFormat::Pretty);
        });
    }

    #[test]
    fn test_log_format_override() {
        temp_env::with_var("LOG_FORMAT", Some("JSON"), || {
            assert_eq!(LogFormat::for_environment(&Environment::Development), LogFormat::Json);
        });
        temp_env::with_var("LOG_FORMAT", Some("pretty"), || {
            assert_eq!(LogFormat::for_environment(&Environment::Production), LogFormat::Pretty);
        });
        temp_env::with_var("LOG_FORMAT", Some("logfmt"), || {
            assert_eq!(LogFormat::for_environment(&Environment::Production), LogFormat::Json);
        });
    }

    #[test]
    fn test_default_filter_quiets_clients() {
        let prod = default_filter(&Environment::Production);
        assert!(prod.starts_with("info"));
        assert!(prod.contains("redis=warn"));
        assert!(default_filter(&Environment::Development).contains("lettre=info"));
        assert!(EnvFilter::try_new(prod).is_ok());
    }

    #[test]
    fn test_init_tracing_twice() {
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            init_tracing(&Environment::Production);
            init_tracing(&Environment::Development);
        });
    }
}
