//! Control Plane trait for node communication
//!
//! Everything above the socket talks to a node through this trait, so the
//! topology and sequence layers never depend on the concrete transport.
//! `RawConnection` is the TCP/TLS implementation; tests plug in an
//! in-memory store.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::Command;
use crate::config::ServerAddress;
use crate::utils::{ConnectionError, RespValue};

/// Request/response access to a single node
pub trait ControlPlane: Send {
    /// Send one command and read its reply
    fn execute(&mut self, command: &Command) -> io::Result<RespValue>;

    /// Write all commands in one go, then read one reply per command
    fn execute_pipeline(&mut self, commands: &[Command]) -> io::Result<Vec<RespValue>>;
}

/// Extension trait with common control plane operations
pub trait ControlPlaneExt: ControlPlane {
    /// Send PING and verify PONG response
    fn ping(&mut self) -> io::Result<bool> {
        match self.execute(&Command::from_raw("PING", Vec::new()))? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }

    /// Get CLUSTER NODES response as string
    fn cluster_nodes(&mut self) -> io::Result<String> {
        match self.execute(&Command::from_raw("CLUSTER", vec![b"NODES".to_vec()]))? {
            RespValue::BulkString(data) => String::from_utf8(data).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
            }),
            RespValue::Error(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected CLUSTER NODES response: {:?}", other),
            )),
        }
    }

    /// Send AUTH command
    fn authenticate(&mut self, password: &str, username: Option<&str>) -> io::Result<()> {
        let args = match username {
            Some(user) => vec![user.as_bytes().to_vec(), password.as_bytes().to_vec()],
            None => vec![password.as_bytes().to_vec()],
        };

        match self.execute(&Command::from_raw("AUTH", args))? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(io::Error::new(io::ErrorKind::PermissionDenied, e)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected AUTH response: {:?}", other),
            )),
        }
    }

    /// Send SELECT command
    fn select_db(&mut self, db: u32) -> io::Result<()> {
        let db_arg = itoa::Buffer::new().format(db).as_bytes().to_vec();
        match self.execute(&Command::from_raw("SELECT", vec![db_arg]))? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected SELECT response: {:?}", other),
            )),
        }
    }
}

// Blanket implementation: any ControlPlane automatically gets ControlPlaneExt
impl<T: ControlPlane + ?Sized> ControlPlaneExt for T {}

/// A node connection shared between a topology and the batches opened on it
pub type SharedConnection = Arc<Mutex<Box<dyn ControlPlane>>>;

pub fn share(connection: Box<dyn ControlPlane>) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// Opens node connections; topologies use it to reach nodes they discover
pub trait Connector: Send + Sync {
    fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ControlPlane>, ConnectionError>;
}
