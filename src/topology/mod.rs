//! Topology adapters
//!
//! One interface over a single node, a client-side sharded array of nodes
//! and a server-side cluster. Callers dispatch commands, open batches and
//! enumerate physical nodes without knowing which arrangement is behind.

pub mod clustered;
pub mod sharded;
pub mod standalone;

use std::sync::Arc;

use tracing::info;

pub use clustered::Clustered;
pub use sharded::Sharded;
pub use standalone::Standalone;

use crate::client::{Command, Connector};
use crate::config::{ClientConfig, TopologyKind};
use crate::sequence::{BatchHandle, BatchMode};
use crate::utils::{ClientError, ConfigError, RespValue, Result, Value};

/// Capabilities shared by every topology
pub trait Topology: Send + Sync {
    fn kind(&self) -> TopologyKind;

    /// Send one command; an error reply becomes `ClientError::Server`
    fn call(&self, command: Command) -> Result<Value>;

    /// Open a batch. `key` selects the node where the topology needs one.
    fn open_batch(&self, mode: BatchMode, key: Option<&[u8]>) -> Result<Box<dyn BatchHandle>>;

    /// Number of physical nodes (primaries for a cluster)
    fn node_count(&self) -> Result<usize>;

    /// One topology per physical node
    fn nodes(&self) -> Result<Vec<Arc<dyn Topology>>>;
}

/// Convert a reply to a single call
pub(crate) fn into_result(reply: RespValue) -> Result<Value> {
    match reply {
        RespValue::Error(e) => Err(ClientError::Server(e)),
        other => Ok(Value::from_reply(other)),
    }
}

/// Connect the topology described by `config`
pub fn connect(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<Arc<dyn Topology>> {
    let kind = config.topology_kind();
    let topology: Arc<dyn Topology> = match kind {
        TopologyKind::Standalone => {
            let address = config
                .addresses
                .first()
                .ok_or_else(|| ConfigError::MissingHost(String::new()))?;
            Arc::new(Standalone::connect(address.clone(), connector.as_ref())?)
        }
        TopologyKind::Sharded => Arc::new(Sharded::connect(&config.addresses, connector.as_ref())?),
        TopologyKind::Cluster => Arc::new(Clustered::connect(config.addresses.clone(), connector)?),
    };
    info!(
        "Connected {} topology ({} seed addresses)",
        kind,
        config.addresses.len()
    );
    Ok(topology)
}
