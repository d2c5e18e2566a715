//! Server-side cluster
//!
//! Topology is discovered with CLUSTER NODES from the first reachable
//! seed. Keyed commands go to the primary owning the key's slot; MOVED
//! updates the slot map and retries, ASK retries once on the target with
//! an ASKING prefix. Node-scoped commands go to the node a per-node
//! handle is bound to.
//!
//! There is no cross-node pipeline: pipelined batches dispatch each
//! command as it is queued. Transactions are buffered and sent to the
//! node owning their first key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{into_result, Topology};
use crate::client::{share, Command, ControlPlaneExt, Connector, SharedConnection};
use crate::cluster::ClusterTopology;
use crate::config::{ServerAddress, TopologyKind};
use crate::sequence::{BatchHandle, BatchMode, BufferedBatch, SealedBatch};
use crate::utils::{
    ClientError, ClusterError, InvalidSequenceState, ProtocolError, Redirect, RespValue, Result,
    Value,
};

/// Redirects followed per command before giving up
pub const MAX_REDIRECTS: usize = 5;

type ConnectionPool = Mutex<HashMap<ServerAddress, SharedConnection>>;

/// Cluster view shared by every handle on the same cluster
pub(crate) struct ClusterState {
    seeds: Vec<ServerAddress>,
    connector: Arc<dyn Connector>,
    topology: RwLock<ClusterTopology>,
    connections: ConnectionPool,
}

fn pooled_connection(
    pool: &ConnectionPool,
    connector: &dyn Connector,
    address: &ServerAddress,
) -> Result<SharedConnection> {
    let mut pool = pool.lock();
    if let Some(conn) = pool.get(address) {
        return Ok(Arc::clone(conn));
    }
    let conn = share(connector.connect(address)?);
    pool.insert(address.clone(), Arc::clone(&conn));
    Ok(conn)
}

/// Fetch CLUSTER NODES from the first candidate that answers
fn discover(
    candidates: &[ServerAddress],
    connector: &dyn Connector,
    pool: &ConnectionPool,
) -> Result<ClusterTopology> {
    for address in candidates {
        let conn = match pooled_connection(pool, connector, address) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Cluster seed {} unreachable: {}", address, e);
                continue;
            }
        };

        let nodes = conn.lock().cluster_nodes();
        match nodes {
            Ok(text) => {
                let topology = ClusterTopology::from_cluster_nodes(&text, address)?;
                info!(
                    "Discovered cluster topology from {}: {} primaries, {} nodes",
                    address,
                    topology.num_primaries(),
                    topology.nodes.len()
                );
                return Ok(topology);
            }
            Err(e) => {
                warn!("CLUSTER NODES failed on {}: {}", address, e);
                pool.lock().remove(address);
            }
        }
    }
    Err(ClusterError::NoReachableSeed.into())
}

fn redirect_target(redirect: &Redirect, current: &ServerAddress) -> ServerAddress {
    if redirect.host.is_empty() {
        ServerAddress::new(current.host.clone(), redirect.port)
    } else {
        ServerAddress::new(redirect.host.clone(), redirect.port)
    }
}

impl ClusterState {
    fn connect(seeds: Vec<ServerAddress>, connector: Arc<dyn Connector>) -> Result<Self> {
        let connections = Mutex::new(HashMap::new());
        let topology = discover(&seeds, connector.as_ref(), &connections)?;
        Ok(Self {
            seeds,
            connector,
            topology: RwLock::new(topology),
            connections,
        })
    }

    fn connection(&self, address: &ServerAddress) -> Result<SharedConnection> {
        pooled_connection(&self.connections, self.connector.as_ref(), address)
    }

    /// Re-read the topology from known primaries, then the seeds
    fn refresh(&self) -> Result<()> {
        let mut candidates: Vec<ServerAddress> = self
            .topology
            .read()
            .primaries()
            .map(|n| n.address.clone())
            .collect();
        candidates.extend(self.seeds.iter().cloned());

        let topology = discover(&candidates, self.connector.as_ref(), &self.connections)?;
        *self.topology.write() = topology;
        Ok(())
    }

    fn apply_moved(&self, redirect: &Redirect, target: &ServerAddress) -> Result<()> {
        let known = self
            .topology
            .read()
            .nodes
            .iter()
            .any(|n| n.address == *target);
        if known {
            self.topology.write().assign_slot(redirect.slot, target);
            Ok(())
        } else {
            self.refresh()
        }
    }

    fn primaries(&self) -> Vec<ServerAddress> {
        self.topology
            .read()
            .primaries()
            .map(|n| n.address.clone())
            .collect()
    }

    fn first_primary(&self) -> Result<ServerAddress> {
        self.primaries()
            .into_iter()
            .next()
            .ok_or_else(|| ClusterError::NoPrimaries.into())
    }

    fn address_for_key(&self, key: &[u8]) -> Result<ServerAddress> {
        Ok(self.topology.read().address_for_key(key)?.clone())
    }

    fn address_for(&self, command: &Command, node: Option<&ServerAddress>) -> Result<ServerAddress> {
        match command.routing_key() {
            Some(key) if !command.is_node_scoped() => self.address_for_key(key),
            _ => match node {
                Some(node) => Ok(node.clone()),
                None => self.first_primary(),
            },
        }
    }

    /// Send a command, following redirects; returns the final raw reply
    fn dispatch(&self, command: &Command, node: Option<&ServerAddress>) -> Result<RespValue> {
        let mut address = self.address_for(command, node)?;
        let mut asking = false;

        for _ in 0..=MAX_REDIRECTS {
            let conn = self.connection(&address)?;
            let reply = if asking {
                let mut replies = conn
                    .lock()
                    .execute_pipeline(&[Command::from_raw("ASKING", Vec::new()), command.clone()])?;
                replies.pop().ok_or(ProtocolError::ReplyCountMismatch {
                    expected: 2,
                    actual: 0,
                })?
            } else {
                conn.lock().execute(command)?
            };

            let Some(redirect) = reply.redirect() else {
                return Ok(reply);
            };
            let target = redirect_target(&redirect, &address);
            debug!(
                "{} {} redirected to {} (slot {}, {})",
                command.name(),
                address,
                target,
                redirect.slot,
                if redirect.is_ask { "ASK" } else { "MOVED" }
            );
            if !redirect.is_ask {
                self.apply_moved(&redirect, &target)?;
            }
            asking = redirect.is_ask;
            address = target;
        }

        Err(ProtocolError::TooManyRedirects(command.name().to_string()).into())
    }

    /// Send a sealed transaction to the node owning its key, retrying on MOVED
    fn run_transaction(
        &self,
        batch: &SealedBatch,
        key: Option<&[u8]>,
        node: Option<&ServerAddress>,
    ) -> Result<Vec<Value>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut address = match key.or_else(|| batch.first_key()) {
            Some(key) => self.address_for_key(key)?,
            None => match node {
                Some(node) => node.clone(),
                None => self.first_primary()?,
            },
        };

        for _ in 0..=MAX_REDIRECTS {
            let conn = self.connection(&address)?;
            let replies = conn.lock().execute_pipeline(batch.commands())?;

            let moved = replies
                .iter()
                .filter_map(RespValue::redirect)
                .find(|r| !r.is_ask);
            let Some(redirect) = moved else {
                debug!(
                    "Executed transaction of {} commands on {}",
                    batch.commands().len(),
                    address
                );
                return batch.collect(replies);
            };

            let target = redirect_target(&redirect, &address);
            debug!("Transaction redirected from {} to {}", address, target);
            self.apply_moved(&redirect, &target)?;
            address = target;
        }

        Err(ProtocolError::TooManyRedirects("MULTI".to_string()).into())
    }
}

/// Handle on a cluster, optionally bound to one primary
#[derive(Clone)]
pub struct Clustered {
    state: Arc<ClusterState>,
    node: Option<ServerAddress>,
}

impl Clustered {
    pub fn connect(seeds: Vec<ServerAddress>, connector: Arc<dyn Connector>) -> Result<Self> {
        Ok(Self {
            state: Arc::new(ClusterState::connect(seeds, connector)?),
            node: None,
        })
    }

    /// Primary that node-scoped commands go to, if bound
    pub fn node(&self) -> Option<&ServerAddress> {
        self.node.as_ref()
    }

    pub fn primaries(&self) -> Vec<ServerAddress> {
        self.state.primaries()
    }

    /// Force a topology refresh
    pub fn refresh(&self) -> Result<()> {
        self.state.refresh()
    }
}

impl Topology for Clustered {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Cluster
    }

    fn call(&self, command: Command) -> Result<Value> {
        into_result(self.state.dispatch(&command, self.node.as_ref())?)
    }

    fn open_batch(&self, mode: BatchMode, key: Option<&[u8]>) -> Result<Box<dyn BatchHandle>> {
        let state = Arc::clone(&self.state);
        let node = self.node.clone();
        Ok(match mode {
            BatchMode::Pipeline => Box::new(ImmediateBatch {
                state,
                node,
                group: None,
            }),
            BatchMode::Transaction => Box::new(ClusterTransaction {
                state,
                node,
                key: key.map(<[u8]>::to_vec),
                batch: BufferedBatch::new(BatchMode::Transaction),
            }),
        })
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.state.topology.read().num_primaries())
    }

    fn nodes(&self) -> Result<Vec<Arc<dyn Topology>>> {
        Ok(self
            .state
            .primaries()
            .into_iter()
            .map(|address| {
                Arc::new(Clustered {
                    state: Arc::clone(&self.state),
                    node: Some(address),
                }) as Arc<dyn Topology>
            })
            .collect())
    }
}

/// Pipelined batch that sends each command as it is queued; atomic groups
/// are buffered and sent as one transaction when closed
struct ImmediateBatch {
    state: Arc<ClusterState>,
    node: Option<ServerAddress>,
    group: Option<BufferedBatch>,
}

impl BatchHandle for ImmediateBatch {
    fn queue(&mut self, command: Command) -> Result<Option<Value>> {
        if let Some(group) = self.group.as_mut() {
            group.push(command);
            return Ok(None);
        }
        let reply = self.state.dispatch(&command, self.node.as_ref())?;
        Ok(Some(Value::from_reply(reply)))
    }

    fn begin_atomic(&mut self) -> Result<()> {
        if self.group.is_some() {
            return Err(InvalidSequenceState::NestedTransaction.into());
        }
        self.group = Some(BufferedBatch::new(BatchMode::Transaction));
        Ok(())
    }

    fn end_atomic(&mut self) -> Result<Option<Value>> {
        let group = self
            .group
            .take()
            .ok_or(InvalidSequenceState::CommitWithoutTransaction)?;
        let sealed = group.seal()?;
        match self.state.run_transaction(&sealed, None, self.node.as_ref()) {
            Ok(values) => Ok(Some(Value::Array(values))),
            Err(ClientError::Server(e)) => Ok(Some(Value::Error(e))),
            Err(e) => Err(e),
        }
    }

    fn execute(self: Box<Self>) -> Result<Vec<Value>> {
        if self.group.is_some() {
            return Err(InvalidSequenceState::UncommittedTransaction.into());
        }
        Ok(Vec::new())
    }

    fn dispatches_immediately(&self) -> bool {
        true
    }
}

/// Transaction buffered until execution, then routed by its key
struct ClusterTransaction {
    state: Arc<ClusterState>,
    node: Option<ServerAddress>,
    key: Option<Vec<u8>>,
    batch: BufferedBatch,
}

impl BatchHandle for ClusterTransaction {
    fn queue(&mut self, command: Command) -> Result<Option<Value>> {
        self.batch.push(command);
        Ok(None)
    }

    fn begin_atomic(&mut self) -> Result<()> {
        self.batch.begin_group()
    }

    fn end_atomic(&mut self) -> Result<Option<Value>> {
        self.batch.end_group()?;
        Ok(None)
    }

    fn execute(self: Box<Self>) -> Result<Vec<Value>> {
        let sealed = self.batch.seal()?;
        self.state
            .run_transaction(&sealed, self.key.as_deref(), self.node.as_ref())
    }
}
