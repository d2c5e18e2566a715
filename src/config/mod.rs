//! Configuration module

pub mod client_config;
pub mod dsn;
pub mod tls_config;

pub use client_config::{AuthConfig, ClientConfig, ServerAddress, TopologyKind, DEFAULT_PORT};
pub use tls_config::TlsConfig;
