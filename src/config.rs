use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::VatsimOAuthConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read from the environment (and `.env`, loaded by
/// `main` before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub cors_origin: String,
    /// Where OAuth redirects land, e.g. `https://book.example.org`.
    pub frontend_url: String,
    /// Enables `Secure` cookies and hides internal error messages.
    pub production: bool,
    pub secret_key: String,
    pub outbound_timeout: Duration,
    pub oauth: VatsimOAuthConfig,
    pub roster_base_url: String,
    pub roster_api_key: Option<String>,
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let secret_key = lookup("SECRET_KEY").ok_or(ConfigError::Missing("SECRET_KEY"))?;
        let metrics_port = match lookup("SLOTBOOK_METRICS_PORT") {
            None => None,
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "SLOTBOOK_METRICS_PORT",
                value: raw,
            })?),
        };
        let outbound_timeout = Duration::from_secs(parse(&lookup, "SLOTBOOK_HTTP_TIMEOUT_SECS", 15u64)?);

        Ok(Self {
            bind: var("SLOTBOOK_BIND", "0.0.0.0"),
            port: parse(&lookup, "SLOTBOOK_PORT", 3000u16)?,
            data_dir: PathBuf::from(var("SLOTBOOK_DATA_DIR", "./data")),
            compact_threshold: parse(&lookup, "SLOTBOOK_COMPACT_THRESHOLD", 1000u64)?,
            metrics_port,
            cors_origin: var("SLOTBOOK_CORS_ORIGIN", "http://localhost:5173"),
            frontend_url: var("SLOTBOOK_FRONTEND_URL", "").trim_end_matches('/').to_string(),
            production: var("SLOTBOOK_ENV", "development") == "production",
            secret_key,
            outbound_timeout,
            oauth: VatsimOAuthConfig {
                auth_url: var("VATSIM_AUTH_URL", "https://auth.vatsim.net/oauth/authorize"),
                token_url: var("VATSIM_TOKEN_URL", "https://auth.vatsim.net/oauth/token"),
                user_url: var("VATSIM_USER_URL", "https://auth.vatsim.net/api/user"),
                client_id: lookup("VATSIM_CLIENT_ID"),
                client_secret: lookup("VATSIM_CLIENT_SECRET"),
                redirect_uri: lookup("VATSIM_REDIRECT_URI"),
                timeout: outbound_timeout,
            },
            roster_base_url: var("VATSIM_API_BASE", "https://api.vatsim.net"),
            roster_api_key: lookup("VATSIM_API_KEY"),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("SECRET_KEY", "s3cret")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.cors_origin, "http://localhost:5173");
        assert_eq!(config.outbound_timeout, Duration::from_secs(15));
        assert_eq!(config.wal_path(), PathBuf::from("./data/slotbook.wal"));
        assert!(!config.production);
        assert!(config.metrics_port.is_none());
        assert!(config.roster_api_key.is_none());
    }

    #[test]
    fn secret_key_is_required() {
        assert_eq!(
            Config::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::Missing("SECRET_KEY")
        );
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = Config::from_lookup(lookup(&[("SECRET_KEY", "x"), ("SLOTBOOK_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SLOTBOOK_PORT", .. }));
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("SECRET_KEY", "x"),
            ("SLOTBOOK_ENV", "production"),
            ("SLOTBOOK_FRONTEND_URL", "https://book.example.org/"),
            ("SLOTBOOK_METRICS_PORT", "9100"),
            ("VATSIM_CLIENT_ID", "77"),
        ]))
        .unwrap();
        assert!(config.production);
        assert_eq!(config.frontend_url, "https://book.example.org");
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.oauth.client_id.as_deref(), Some("77"));
    }
}
