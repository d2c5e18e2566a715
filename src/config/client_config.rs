//! Client configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::tls_config::TlsConfig;
use crate::client::Serializer;
use crate::utils::ConfigError;

pub const DEFAULT_PORT: u16 = 6379;

/// Resolved server address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = ConfigError;

    /// "host", "host:port" or "[v6]:port"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidParameter {
            name: "host".to_string(),
            value: s.to_string(),
        };

        if s.is_empty() {
            return Err(invalid());
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                let port: u16 = port.parse().map_err(|_| invalid())?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Ok(Self::new(host, port))
            }
            Some(_) => Err(invalid()),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub password: String,
    pub username: Option<String>,
}

/// Which topology a configuration resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Standalone,
    Sharded,
    Cluster,
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyKind::Standalone => write!(f, "standalone"),
            TopologyKind::Sharded => write!(f, "sharded"),
            TopologyKind::Cluster => write!(f, "cluster"),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Connection
    pub addresses: Vec<ServerAddress>,
    pub auth: Option<AuthConfig>,
    pub tls: Option<TlsConfig>,
    pub dbnum: Option<u32>,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,

    // Topology
    pub cluster: bool,
    /// Defer connecting until the first command
    pub lazy: Option<bool>,

    // Values
    pub prefix: Option<String>,
    pub serializer: Serializer,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: vec![ServerAddress::new("127.0.0.1", DEFAULT_PORT)],
            auth: None,
            tls: None,
            dbnum: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            cluster: false,
            lazy: None,
            prefix: None,
            serializer: Serializer::None,
        }
    }
}

impl ClientConfig {
    /// Topology implied by the configuration
    pub fn topology_kind(&self) -> TopologyKind {
        if self.cluster {
            TopologyKind::Cluster
        } else if self.addresses.len() > 1 {
            TopologyKind::Sharded
        } else {
            TopologyKind::Standalone
        }
    }

    /// Sharded setups connect lazily unless told otherwise
    pub fn is_lazy(&self) -> bool {
        self.lazy
            .unwrap_or(self.topology_kind() == TopologyKind::Sharded)
    }

    pub fn prefix_bytes(&self) -> Option<Vec<u8>> {
        self.prefix
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| p.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            "10.0.0.1:7000".parse::<ServerAddress>().unwrap(),
            ServerAddress::new("10.0.0.1", 7000)
        );
        assert_eq!(
            "cache".parse::<ServerAddress>().unwrap(),
            ServerAddress::new("cache", DEFAULT_PORT)
        );
        assert_eq!(
            "[::1]:6380".parse::<ServerAddress>().unwrap(),
            ServerAddress::new("::1", 6380)
        );
        assert!("host:notaport".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn test_topology_kind() {
        let mut config = ClientConfig::default();
        assert_eq!(config.topology_kind(), TopologyKind::Standalone);
        assert!(!config.is_lazy());

        config.addresses.push(ServerAddress::new("127.0.0.1", 6380));
        assert_eq!(config.topology_kind(), TopologyKind::Sharded);
        assert!(config.is_lazy());

        config.cluster = true;
        assert_eq!(config.topology_kind(), TopologyKind::Cluster);
    }
}
