//! Client-side sharding over independent nodes
//!
//! Keys are hashed to a cluster slot (CRC16, hash tags honoured) and the
//! slot space is split evenly across shards, so `{tag}` keys land together.

use std::sync::Arc;

use tracing::debug;

use super::{Standalone, Topology};
use crate::client::{Command, Connector};
use crate::cluster::{slot_for_key, SLOT_COUNT};
use crate::config::{ServerAddress, TopologyKind};
use crate::sequence::{BatchHandle, BatchMode};
use crate::utils::{ClientError, ConfigError, Result, Value};

#[derive(Clone)]
pub struct Sharded {
    shards: Vec<Standalone>,
}

impl Sharded {
    pub fn new(shards: Vec<Standalone>) -> Result<Self> {
        if shards.is_empty() {
            return Err(ConfigError::MissingHost("sharded topology without hosts".to_string()).into());
        }
        Ok(Self { shards })
    }

    pub fn connect(addresses: &[ServerAddress], connector: &dyn Connector) -> Result<Self> {
        let shards = addresses
            .iter()
            .map(|address| Standalone::connect(address.clone(), connector))
            .collect::<Result<Vec<_>>>()?;
        Self::new(shards)
    }

    /// Shard owning `key`
    pub fn shard_for_key(&self, key: &[u8]) -> &Standalone {
        let slot = slot_for_key(key) as usize;
        &self.shards[slot * self.shards.len() / SLOT_COUNT as usize]
    }

    pub fn shards(&self) -> &[Standalone] {
        &self.shards
    }
}

impl Topology for Sharded {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Sharded
    }

    /// Keyed commands go to their shard; keyless ones run on every shard
    /// and return a map of "host:port" to reply
    fn call(&self, command: Command) -> Result<Value> {
        if let Some(key) = command.routing_key() {
            let shard = self.shard_for_key(key);
            debug!("Routing {} to shard {}", command.name(), shard.address());
            return shard.call(command);
        }

        let replies = self
            .shards
            .iter()
            .map(|shard| {
                let reply = shard.dispatch(&command)?;
                Ok((Value::from(shard.address().to_string()), reply))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Map(replies))
    }

    fn open_batch(&self, mode: BatchMode, key: Option<&[u8]>) -> Result<Box<dyn BatchHandle>> {
        let key = key.ok_or(ClientError::MissingNodeSelection {
            operation: mode.operation(),
        })?;
        self.shard_for_key(key).open_batch(mode, None)
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.shards.len())
    }

    fn nodes(&self) -> Result<Vec<Arc<dyn Topology>>> {
        Ok(self
            .shards
            .iter()
            .map(|shard| Arc::new(shard.clone()) as Arc<dyn Topology>)
            .collect())
    }
}
