//! Environment configuration for the webhook
//!
//! Configuration is read through the [`EnvSource`] trait, enabling
//! dependency injection and mocking for tests without touching
//! process-global state.
//!
//! | Variable            | Required | Default                 |
//! |---------------------|----------|-------------------------|
//! | `PORT`              | yes      | -                       |
//! | `TLS_CERT_PATH`     | yes      | -                       |
//! | `TLS_KEY_PATH`      | yes      | -                       |
//! | `DEFAULT_ARCH`      | no       | `amd64`                 |
//! | `LOG_LEVEL`         | no       | `info`                  |
//! | `CACHE_TIMEOUT`     | no       | `300` (seconds)         |
//! | `MUTATION_STRATEGY` | no       | `first-image-preferred` |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
use crate::webhook::mutator::Strategy;
use crate::Result;

/// Trait for reading configuration variables from the environment
///
/// Abstracts environment access so configuration parsing can be unit
/// tested without manipulating global state.
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Look up a variable by name; absent variables yield `None`
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads process environment variables
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Webhook configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTPS listen port
    pub port: u16,
    /// Path to the PEM server certificate
    pub tls_cert_path: PathBuf,
    /// Path to the PEM server key
    pub tls_key_path: PathBuf,
    /// Architecture used when detection fails
    pub default_arch: String,
    /// Default tracing filter directive
    pub log_level: String,
    /// TTL for architecture cache entries
    pub cache_timeout: Duration,
    /// How the mutator selects an architecture across images
    pub strategy: Strategy,
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_source(&OsEnv)
    }

    /// Load configuration from an arbitrary environment source
    pub fn from_source(source: &dyn EnvSource) -> Result<Self> {
        let port_raw = source
            .var("PORT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config("PORT is required"))?;
        let port: u16 = port_raw
            .parse()
            .map_err(|_| Error::config(format!("invalid PORT: {port_raw}")))?;
        if port == 0 {
            return Err(Error::config("PORT must be between 1 and 65535"));
        }

        let tls_cert_path = source
            .var("TLS_CERT_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::config("TLS_CERT_PATH is required"))?;

        let tls_key_path = source
            .var("TLS_KEY_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::config("TLS_KEY_PATH is required"))?;

        let default_arch = source
            .var("DEFAULT_ARCH")
            .unwrap_or_else(|| crate::DEFAULT_ARCH.to_string());
        let log_level = source.var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let timeout_raw = source
            .var("CACHE_TIMEOUT")
            .unwrap_or_else(|| "300".to_string());
        let timeout_secs: u64 = timeout_raw
            .parse()
            .map_err(|_| Error::config(format!("invalid CACHE_TIMEOUT: {timeout_raw}")))?;

        let strategy = match source.var("MUTATION_STRATEGY") {
            Some(raw) => raw.parse()?,
            None => Strategy::default(),
        };

        Ok(Self {
            port,
            tls_cert_path,
            tls_key_path,
            default_arch,
            log_level,
            cache_timeout: Duration::from_secs(timeout_secs),
            strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> MockEnvSource {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| map.get(key).cloned());
        mock
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PORT", "8443"),
            ("TLS_CERT_PATH", "/certs/tls.crt"),
            ("TLS_KEY_PATH", "/certs/tls.key"),
        ]
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_source(&env(&required())).unwrap();
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.default_arch, "amd64");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.cache_timeout, Duration::from_secs(300));
        assert_eq!(cfg.strategy, Strategy::FirstImagePreferred);
    }

    #[test]
    fn test_missing_port_is_rejected() {
        let err = Config::from_source(&env(&[
            ("TLS_CERT_PATH", "/c"),
            ("TLS_KEY_PATH", "/k"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT is required"));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut pairs = required();
        pairs[0] = ("PORT", "not-a-number");
        let err = Config::from_source(&env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));

        pairs[0] = ("PORT", "0");
        let err = Config::from_source(&env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("between 1 and 65535"));

        // Out of u16 range
        pairs[0] = ("PORT", "70000");
        assert!(Config::from_source(&env(&pairs)).is_err());
    }

    #[test]
    fn test_missing_tls_paths_are_rejected() {
        let err = Config::from_source(&env(&[("PORT", "8443"), ("TLS_KEY_PATH", "/k")]))
            .unwrap_err();
        assert!(err.to_string().contains("TLS_CERT_PATH is required"));

        let err = Config::from_source(&env(&[("PORT", "8443"), ("TLS_CERT_PATH", "/c")]))
            .unwrap_err();
        assert!(err.to_string().contains("TLS_KEY_PATH is required"));
    }

    #[test]
    fn test_optional_overrides() {
        let mut pairs = required();
        pairs.push(("DEFAULT_ARCH", "arm64"));
        pairs.push(("LOG_LEVEL", "debug"));
        pairs.push(("CACHE_TIMEOUT", "60"));
        pairs.push(("MUTATION_STRATEGY", "intersect-lenient"));

        let cfg = Config::from_source(&env(&pairs)).unwrap();
        assert_eq!(cfg.default_arch, "arm64");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.cache_timeout, Duration::from_secs(60));
        assert_eq!(cfg.strategy, Strategy::IntersectLenient);
    }

    #[test]
    fn test_invalid_cache_timeout_is_rejected() {
        let mut pairs = required();
        pairs.push(("CACHE_TIMEOUT", "five minutes"));
        let err = Config::from_source(&env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("invalid CACHE_TIMEOUT"));
    }

    #[test]
    fn test_invalid_strategy_is_rejected() {
        let mut pairs = required();
        pairs.push(("MUTATION_STRATEGY", "guess"));
        assert!(Config::from_source(&env(&pairs)).is_err());
    }
}
