//! Raw TCP connection to a single node
//!
//! This module provides direct TCP (and TLS) connections speaking RESP
//! through the hand-rolled codec in `utils::resp`.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::command::Command;
use super::control_plane::{ControlPlane, ControlPlaneExt, Connector};
use crate::config::{ClientConfig, ServerAddress, TlsConfig};
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

/// Raw connection wrapper (TCP or TLS)
///
/// For TCP, we split into separate reader/writer.
/// For TLS, we use a single stream since native-tls doesn't support cloning.
pub enum RawConnection {
    Tcp {
        writer: BufWriter<TcpStream>,
        reader: BufReader<TcpStream>,
        encoder: RespEncoder,
    },
    #[cfg(feature = "native-tls-backend")]
    NativeTls {
        stream: BufReader<native_tls::TlsStream<TcpStream>>,
        encoder: RespEncoder,
    },
}

fn open_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream, ConnectionError> {
    let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
        host: host.to_string(),
        port,
        source,
    };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(connect_failed)?
        .next()
        .ok_or_else(|| {
            connect_failed(io::Error::new(io::ErrorKind::NotFound, "No addresses found"))
        })?;

    let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(connect_failed)?;

    // Disable Nagle's algorithm
    stream.set_nodelay(true).ok();

    Ok(stream)
}

impl RawConnection {
    /// Create new TCP connection
    pub fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let stream = open_tcp(host, port, connect_timeout)?;

        let writer = BufWriter::with_capacity(
            16384,
            stream
                .try_clone()
                .map_err(|e| ConnectionError::ConnectFailed {
                    host: host.to_string(),
                    port,
                    source: e,
                })?,
        );
        let reader = BufReader::with_capacity(16384, stream);

        Ok(RawConnection::Tcp {
            writer,
            reader,
            encoder: RespEncoder::with_capacity(1024),
        })
    }

    /// Create new TLS connection
    #[cfg(feature = "native-tls-backend")]
    pub fn connect_tls(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        tls_config: &TlsConfig,
    ) -> Result<Self, ConnectionError> {
        use native_tls::{Certificate, Identity, TlsConnector};

        let mut builder = TlsConnector::builder();

        if tls_config.skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(ref ca_path) = tls_config.ca_cert {
            let ca_data = std::fs::read(ca_path).map_err(|e| {
                ConnectionError::TlsFailed(format!("Failed to read CA cert: {}", e))
            })?;
            let cert = Certificate::from_pem(&ca_data)
                .map_err(|e| ConnectionError::TlsFailed(format!("Invalid CA cert: {}", e)))?;
            builder.add_root_certificate(cert);
        }

        if let (true, Some(cert_path), Some(key_path)) = (
            tls_config.has_client_cert(),
            &tls_config.client_cert,
            &tls_config.client_key,
        ) {
            let cert_data = std::fs::read(cert_path).map_err(|e| {
                ConnectionError::TlsFailed(format!("Failed to read client cert: {}", e))
            })?;
            let key_data = std::fs::read(key_path).map_err(|e| {
                ConnectionError::TlsFailed(format!("Failed to read client key: {}", e))
            })?;
            let identity = Identity::from_pkcs8(&cert_data, &key_data).map_err(|e| {
                ConnectionError::TlsFailed(format!("Invalid client identity: {}", e))
            })?;
            builder.identity(identity);
        }

        let connector = builder.build().map_err(|e| {
            ConnectionError::TlsFailed(format!("Failed to build TLS connector: {}", e))
        })?;

        let tcp_stream = open_tcp(host, port, connect_timeout)?;
        let sni_host = tls_config.sni.as_deref().unwrap_or(host);
        let tls_stream = connector
            .connect(sni_host, tcp_stream)
            .map_err(|e| ConnectionError::TlsFailed(format!("TLS handshake failed: {}", e)))?;

        Ok(RawConnection::NativeTls {
            stream: BufReader::with_capacity(16384, tls_stream),
            encoder: RespEncoder::with_capacity(1024),
        })
    }

    fn encoder_mut(&mut self) -> &mut RespEncoder {
        match self {
            RawConnection::Tcp { encoder, .. } => encoder,
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { encoder, .. } => encoder,
        }
    }

    /// Write the encoder contents and flush
    fn send(&mut self) -> io::Result<()> {
        match self {
            RawConnection::Tcp {
                writer, encoder, ..
            } => {
                writer.write_all(encoder.as_bytes())?;
                writer.flush()
            }
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream, encoder } => {
                let tls = stream.get_mut();
                tls.write_all(encoder.as_bytes())?;
                tls.flush()
            }
        }
    }

    fn read_responses(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        match self {
            RawConnection::Tcp { reader, .. } => RespDecoder::new(reader).decode_pipeline(count),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream, .. } => {
                RespDecoder::new(stream).decode_pipeline(count)
            }
        }
    }

    /// Set read timeout
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            RawConnection::Tcp { reader, .. } => reader.get_ref().set_read_timeout(timeout),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream, .. } => {
                stream.get_ref().get_ref().set_read_timeout(timeout)
            }
        }
    }

    /// Set write timeout
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            RawConnection::Tcp { writer, .. } => writer.get_ref().set_write_timeout(timeout),
            #[cfg(feature = "native-tls-backend")]
            RawConnection::NativeTls { stream, .. } => {
                stream.get_ref().get_ref().set_write_timeout(timeout)
            }
        }
    }
}

impl ControlPlane for RawConnection {
    fn execute(&mut self, command: &Command) -> io::Result<RespValue> {
        let encoder = self.encoder_mut();
        encoder.clear();
        encoder.encode_parts(command.parts());
        self.send()?;

        let mut replies = self.read_responses(1)?;
        replies
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Missing reply"))
    }

    fn execute_pipeline(&mut self, commands: &[Command]) -> io::Result<Vec<RespValue>> {
        let encoder = self.encoder_mut();
        encoder.clear();
        for command in commands {
            encoder.encode_parts(command.parts());
        }
        self.send()?;
        self.read_responses(commands.len())
    }
}

/// Connection factory for creating connections with common config
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub tls_config: Option<TlsConfig>,
    pub auth_password: Option<String>,
    pub auth_username: Option<String>,
    pub dbnum: Option<u32>,
}

impl ConnectionFactory {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.read_timeout,
            tls_config: config.tls.clone(),
            auth_password: config.auth.as_ref().map(|a| a.password.clone()),
            auth_username: config.auth.as_ref().and_then(|a| a.username.clone()),
            dbnum: config.dbnum,
        }
    }

    /// Create a new connection to the specified host:port
    pub fn create(&self, host: &str, port: u16) -> Result<RawConnection, ConnectionError> {
        let mut conn = match &self.tls_config {
            #[cfg(feature = "native-tls-backend")]
            Some(tls) => RawConnection::connect_tls(host, port, self.connect_timeout, tls)?,
            #[cfg(not(feature = "native-tls-backend"))]
            Some(_) => {
                return Err(ConnectionError::TlsFailed(
                    "TLS support not compiled in".to_string(),
                ));
            }
            None => RawConnection::connect_tcp(host, port, self.connect_timeout)?,
        };

        conn.set_read_timeout(self.read_timeout).ok();
        conn.set_write_timeout(self.write_timeout).ok();

        if let Some(ref password) = self.auth_password {
            conn.authenticate(password, self.auth_username.as_deref())
                .map_err(|e| ConnectionError::AuthFailed(e.to_string()))?;
        }

        if let Some(db) = self.dbnum.filter(|&db| db > 0) {
            conn.select_db(db)
                .map_err(|e| ConnectionError::SelectFailed {
                    db,
                    reason: e.to_string(),
                })?;
        }

        debug!("Connected to {}:{}", host, port);
        Ok(conn)
    }
}

impl Connector for ConnectionFactory {
    fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ControlPlane>, ConnectionError> {
        Ok(Box::new(self.create(&address.host, address.port)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Valkey server
    // They are marked as ignored by default

    #[test]
    #[ignore]
    fn test_tcp_connection() {
        let mut conn = RawConnection::connect_tcp("127.0.0.1", 6379, Duration::from_secs(5))
            .expect("Failed to connect");

        assert!(conn.ping().expect("Ping failed"));
    }

    #[test]
    #[ignore]
    fn test_pipeline_against_server() {
        let factory = ConnectionFactory::from_config(&ClientConfig::default());
        let mut conn = factory
            .create("127.0.0.1", 6379)
            .expect("Failed to connect");

        let replies = conn
            .execute_pipeline(&[
                Command::new("SET", ["raw:x", "1"]),
                Command::new("INCR", ["raw:x"]),
                Command::new("DEL", ["raw:x"]),
            ])
            .expect("Pipeline failed");
        assert_eq!(replies[1], RespValue::Integer(2));
    }

    #[test]
    fn test_connect_refused() {
        let err = RawConnection::connect_tcp("127.0.0.1", 1, Duration::from_millis(200))
            .err()
            .expect("port 1 should refuse");
        assert!(matches!(err, ConnectionError::ConnectFailed { port: 1, .. }));
    }
}
