//! Client facade
//!
//! `Proxy` resolves a topology (eagerly, or on first use when lazy),
//! forwards commands to it and opens sequences. Clones share the same
//! connection state.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::{Command, ConnectionFactory, Connector, Serializer};
use crate::config::ClientConfig;
use crate::sequence::{BatchMode, Sequence};
use crate::topology::{self, Topology};
use crate::utility::ExpiringSet;
use crate::utils::{Result, Value};

type TopologyFactory = Box<dyn Fn() -> Result<Arc<dyn Topology>> + Send + Sync>;

enum ProxyState {
    Unconnected(TopologyFactory),
    Connected(Arc<dyn Topology>),
}

struct ProxyInner {
    state: Mutex<ProxyState>,
    prefix: Option<Arc<[u8]>>,
    serializer: Serializer,
}

#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    fn from_state(state: ProxyState, prefix: Option<Arc<[u8]>>, serializer: Serializer) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                state: Mutex::new(state),
                prefix,
                serializer,
            }),
        }
    }

    /// Build from a DSN, e.g. `redis://localhost:6379/0?prefix=app:`
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Self::connect(&ClientConfig::from_dsn(dsn)?)
    }

    /// Build from a configuration; connects now unless the configuration
    /// is lazy
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let connector: Arc<dyn Connector> = Arc::new(ConnectionFactory::from_config(config));
        Self::with_connector(config, connector)
    }

    /// Build from a configuration using `connector` to reach nodes
    pub fn with_connector(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let prefix = config.prefix_bytes().map(Arc::from);
        let serializer = config.serializer;

        let state = if config.is_lazy() {
            let config = config.clone();
            let factory: TopologyFactory =
                Box::new(move || topology::connect(&config, Arc::clone(&connector)));
            ProxyState::Unconnected(factory)
        } else {
            ProxyState::Connected(topology::connect(config, connector)?)
        };
        Ok(Self::from_state(state, prefix, serializer))
    }

    /// Facade over an existing topology, without prefix or serializer
    pub fn wrap(topology: Arc<dyn Topology>) -> Self {
        Self::from_state(ProxyState::Connected(topology), None, Serializer::None)
    }

    /// Facade that runs `factory` on first use
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Topology>> + Send + Sync + 'static,
    {
        Self::from_state(ProxyState::Unconnected(Box::new(factory)), None, Serializer::None)
    }

    /// Same connection with a different key prefix and value encoding
    pub fn with_options(&self, prefix: Option<&str>, serializer: Serializer) -> Result<Self> {
        let prefix = prefix
            .filter(|p| !p.is_empty())
            .map(|p| Arc::from(p.as_bytes()));
        Ok(Self::from_state(
            ProxyState::Connected(self.topology()?),
            prefix,
            serializer,
        ))
    }

    /// Resolve the topology, connecting on first use
    pub fn topology(&self) -> Result<Arc<dyn Topology>> {
        let mut state = self.inner.state.lock();
        let topology = match &*state {
            ProxyState::Connected(topology) => return Ok(Arc::clone(topology)),
            ProxyState::Unconnected(factory) => {
                debug!("Resolving lazy connection");
                factory()?
            }
        };
        *state = ProxyState::Connected(Arc::clone(&topology));
        Ok(topology)
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.state.lock(), ProxyState::Connected(_))
    }

    pub fn prefix(&self) -> Option<&[u8]> {
        self.inner.prefix.as_deref()
    }

    /// Value-encoding mode of this connection
    pub fn serializer(&self) -> Serializer {
        self.inner.serializer
    }

    /// Send any command
    pub fn call<I, V>(&self, name: &str, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let command = Command::new(name, args).prefixed(self.prefix());
        self.topology()?.call(command)
    }

    fn open(&self, mode: BatchMode, key: Option<&str>) -> Result<Sequence> {
        let key = key.map(|k| {
            let mut bytes = self.prefix().unwrap_or_default().to_vec();
            bytes.extend_from_slice(k.as_bytes());
            bytes
        });
        let batch = self.topology()?.open_batch(mode, key.as_deref())?;
        Ok(Sequence::new(batch, mode, self.inner.prefix.clone()))
    }

    /// Pipelined sequence. Sharded topologies need `sequence_for_key`.
    pub fn sequence(&self) -> Result<Sequence> {
        self.open(BatchMode::Pipeline, None)
    }

    /// Pipelined sequence on the node owning `key`
    pub fn sequence_for_key(&self, key: &str) -> Result<Sequence> {
        self.open(BatchMode::Pipeline, Some(key))
    }

    /// Atomic sequence. Sharded topologies need `transaction_for_key`.
    pub fn transaction(&self) -> Result<Sequence> {
        self.open(BatchMode::Transaction, None)
    }

    /// Atomic sequence on the node owning `key`
    pub fn transaction_for_key(&self, key: &str) -> Result<Sequence> {
        self.open(BatchMode::Transaction, Some(key))
    }

    /// Number of physical nodes
    pub fn count(&self) -> Result<usize> {
        self.topology()?.node_count()
    }

    /// One facade per physical node, sharing prefix and serializer
    pub fn nodes(&self) -> Result<impl Iterator<Item = Proxy>> {
        let prefix = self.inner.prefix.clone();
        let serializer = self.inner.serializer;
        Ok(self
            .topology()?
            .nodes()?
            .into_iter()
            .map(move |node| {
                Proxy::from_state(ProxyState::Connected(node), prefix.clone(), serializer)
            }))
    }

    pub fn expiring_set(&self, key: &str) -> ExpiringSet {
        ExpiringSet::new(key, self.clone())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("connected", &self.is_connected())
            .field("prefix", &self.prefix().map(String::from_utf8_lossy))
            .field("serializer", &self.serializer())
            .finish()
    }
}
