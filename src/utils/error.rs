//! Error types for valkey-sequence

use std::io;
use thiserror::Error;

/// Top-level client error
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid sequence state: {0}")]
    InvalidSequenceState(#[from] InvalidSequenceState),

    #[error("A key must be passed to {operation}() to choose a shard instance")]
    MissingNodeSelection { operation: &'static str },

    #[error("Cannot store {0} value without a configured serializer")]
    UnsupportedValue(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Misuse of the sequence API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidSequenceState {
    #[error("cannot call alias() before queuing a command")]
    AliasWithoutCommand,

    #[error("can only commit nested transactions")]
    CommitWithoutTransaction,

    #[error("cannot execute with an open nested transaction, call commit() first")]
    UncommittedTransaction,

    #[error("cannot create a nested transaction inside a transaction")]
    NestedTransaction,
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("SELECT {db} failed: {reason}")]
    SelectFailed { db: u32, reason: String },

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),
}

/// RESP protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("Expected {expected} replies, got {actual}")]
    ReplyCountMismatch { expected: usize, actual: usize },

    #[error("Too many redirects for command {0}")]
    TooManyRedirects(String),
}

/// Cluster-related errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to parse CLUSTER NODES response: {0}")]
    ParseFailed(String),

    #[error("No primary nodes found in cluster")]
    NoPrimaries,

    #[error("Slot {0} has no assigned node")]
    UnassignedSlot(u16),

    #[error("No seed node reachable for topology discovery")]
    NoReachableSeed,
}

/// DSN / configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid DSN \"{dsn}\": {reason}")]
    InvalidDsn { dsn: String, reason: String },

    #[error("Invalid DSN \"{0}\": scheme must be \"redis\" or \"rediss\"")]
    UnsupportedScheme(String),

    #[error("Invalid DSN \"{0}\": no host given")]
    MissingHost(String),

    #[error("Invalid DSN \"{0}\": the db index must be a number")]
    InvalidDbIndex(String),

    #[error("Invalid value \"{value}\" for parameter \"{name}\"")]
    InvalidParameter { name: String, value: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
