//! DSN parsing
//!
//! Accepted forms:
//!
//! ```text
//! redis://[[user]:password@]host[:port][/db][?param=value&...]
//! rediss://...                                   (TLS)
//! redis:?host[h1:6379]&host[h2:6380][&...]       (host list only)
//! ```
//!
//! Extra hosts can be appended to any form with `host[addr]` query keys.
//! TLS options use `ssl[verify_peer]`, `ssl[cafile]`, `ssl[local_cert]`,
//! `ssl[local_pk]` and `ssl[peer_name]`.
//! More than one host selects the sharded topology unless
//! `redis_cluster=1` is given.

use std::time::Duration;

use tracing::debug;
use url::Url;

use super::client_config::{AuthConfig, ClientConfig, ServerAddress, DEFAULT_PORT};
use super::tls_config::TlsConfig;
use crate::client::Serializer;
use crate::utils::ConfigError;

impl ClientConfig {
    /// Parse a connection DSN
    pub fn from_dsn(dsn: &str) -> Result<Self, ConfigError> {
        let tls = if dsn.starts_with("rediss:") {
            true
        } else if dsn.starts_with("redis:") {
            false
        } else {
            return Err(ConfigError::UnsupportedScheme(dsn.to_string()));
        };

        let url = Url::parse(dsn).map_err(|e| ConfigError::InvalidDsn {
            dsn: dsn.to_string(),
            reason: e.to_string(),
        })?;

        let mut config = ClientConfig {
            addresses: Vec::new(),
            tls: tls.then(TlsConfig::default),
            ..ClientConfig::default()
        };

        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            config
                .addresses
                .push(ServerAddress::new(host, url.port().unwrap_or(DEFAULT_PORT)));

            let db = url.path().trim_matches('/');
            if !db.is_empty() {
                let db = db
                    .parse()
                    .map_err(|_| ConfigError::InvalidDbIndex(dsn.to_string()))?;
                config.dbnum = Some(db);
            }
        } else if !url.path().trim_matches('/').is_empty() {
            return Err(ConfigError::Unsupported(format!(
                "unix socket DSN \"{}\"",
                dsn
            )));
        }

        if let Some(password) = url.password().filter(|p| !p.is_empty()) {
            let username = Some(url.username())
                .filter(|u| !u.is_empty() && *u != "default")
                .map(String::from);
            config.auth = Some(AuthConfig {
                password: password.to_string(),
                username,
            });
        }

        for (name, value) in url.query_pairs() {
            apply_param(&mut config, &name, &value)?;
        }

        if config.addresses.is_empty() {
            return Err(ConfigError::MissingHost(dsn.to_string()));
        }

        Ok(config)
    }
}

fn apply_param(config: &mut ClientConfig, name: &str, value: &str) -> Result<(), ConfigError> {
    if let Some(host) = name
        .strip_prefix("host[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        config.addresses.push(host.parse()?);
        return Ok(());
    }

    if let Some(option) = name
        .strip_prefix("ssl[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let applied = config
            .tls
            .as_mut()
            .map(|tls| tls.apply_option(option, value))
            .unwrap_or(false);
        if !applied {
            debug!("Ignoring TLS option {}={}", option, value);
        }
        return Ok(());
    }

    match name {
        "redis_cluster" => config.cluster = parse_bool(name, value)?,
        "lazy" => config.lazy = Some(parse_bool(name, value)?),
        "timeout" => config.connect_timeout = parse_seconds(name, value)?,
        "read_timeout" => {
            let timeout = parse_seconds(name, value)?;
            config.read_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        "dbindex" => {
            config.dbnum = Some(value.parse().map_err(|_| invalid(name, value))?);
        }
        "prefix" => config.prefix = Some(value.to_string()),
        "serializer" => config.serializer = value.parse::<Serializer>()?,
        "redis_sentinel" => {
            return Err(ConfigError::Unsupported(
                "redis_sentinel is not supported".to_string(),
            ));
        }
        _ => debug!("Ignoring unknown DSN parameter {}={}", name, value),
    }

    Ok(())
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| invalid(name, value))
}
