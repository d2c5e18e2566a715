//! TLS configuration

use std::path::PathBuf;

/// TLS settings for `rediss://` connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub skip_verify: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub sni: Option<String>,
}

impl TlsConfig {
    /// Check if client certificate authentication is configured
    pub fn has_client_cert(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    /// Apply an `ssl[option]` DSN parameter; returns false for unknown options
    pub(crate) fn apply_option(&mut self, option: &str, value: &str) -> bool {
        match option {
            "verify_peer" => self.skip_verify = matches!(value, "0" | "false" | "no" | "off"),
            "cafile" => self.ca_cert = Some(PathBuf::from(value)),
            "local_cert" => self.client_cert = Some(PathBuf::from(value)),
            "local_pk" => self.client_key = Some(PathBuf::from(value)),
            "peer_name" => self.sni = Some(value.to_string()),
            _ => return false,
        }
        true
    }
}
