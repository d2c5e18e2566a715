//! valkey-sequence library
//!
//! One client facade over a single Valkey/Redis node, a client-side sharded
//! set of nodes and a server-side cluster, with chainable command sequences
//! (pipelines, transactions and nested transactions) whose replies come
//! back ordered and optionally aliased, and an expiring set built on them.

pub mod client;
pub mod cluster;
pub mod config;
pub mod proxy;
pub mod sequence;
pub mod topology;
pub mod utility;
pub mod utils;

pub use client::Serializer;
pub use config::ClientConfig;
pub use proxy::Proxy;
pub use sequence::{Output, ResultKey, Results, Sequence};
pub use topology::Topology;
pub use utility::{ExpiringSet, Expiry};
pub use utils::{ClientError, Result, Value};
