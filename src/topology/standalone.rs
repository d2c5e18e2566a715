//! Single node

use std::sync::Arc;

use super::{into_result, Topology};
use crate::client::{share, Command, Connector, ControlPlane, SharedConnection};
use crate::config::{ServerAddress, TopologyKind};
use crate::sequence::{BatchHandle, BatchMode, NodeBatch};
use crate::utils::{Result, Value};

/// One node behind one connection
#[derive(Clone)]
pub struct Standalone {
    address: ServerAddress,
    conn: SharedConnection,
}

impl Standalone {
    pub fn new(address: ServerAddress, conn: Box<dyn ControlPlane>) -> Self {
        Self {
            address,
            conn: share(conn),
        }
    }

    pub fn connect(address: ServerAddress, connector: &dyn Connector) -> Result<Self> {
        let conn = connector.connect(&address)?;
        Ok(Self::new(address, conn))
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Send a command and return the raw reply, errors included
    pub(crate) fn dispatch(&self, command: &Command) -> Result<Value> {
        Ok(Value::from_reply(self.conn.lock().execute(command)?))
    }
}

impl Topology for Standalone {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Standalone
    }

    fn call(&self, command: Command) -> Result<Value> {
        let reply = self.conn.lock().execute(&command)?;
        into_result(reply)
    }

    fn open_batch(&self, mode: BatchMode, _key: Option<&[u8]>) -> Result<Box<dyn BatchHandle>> {
        Ok(Box::new(NodeBatch::new(Arc::clone(&self.conn), mode)))
    }

    fn node_count(&self) -> Result<usize> {
        Ok(1)
    }

    fn nodes(&self) -> Result<Vec<Arc<dyn Topology>>> {
        Ok(vec![Arc::new(self.clone())])
    }
}
