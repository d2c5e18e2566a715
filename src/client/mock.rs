//! In-memory node used by unit tests
//!
//! Implements just enough of the string and sorted-set command surface,
//! MULTI/EXEC, and cluster slot ownership (MOVED/ASK) to drive the
//! topology, sequence and expiring-set layers without a server.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::Command;
use super::control_plane::{ControlPlane, Connector};
use crate::cluster::{slot_for_key, SLOT_COUNT};
use crate::config::ServerAddress;
use crate::utils::{ConnectionError, RespValue};

pub type SharedServer = Arc<Mutex<MockServer>>;

/// Commands the mock understands; anything else is rejected when queued
const SUPPORTED: &[&str] = &[
    "PING", "ECHO", "SET", "GET", "INCR", "INCRBY", "DEL", "UNLINK", "EXISTS", "FLUSHALL",
    "FLUSHDB", "DBSIZE", "ZADD", "ZREM", "ZREMRANGEBYSCORE", "ZRANGEBYSCORE", "ZRANGE",
    "ZCARD", "ZSCORE", "CLUSTER",
];

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn err(message: &str) -> RespValue {
    RespValue::Error(message.to_string())
}

fn bulk(bytes: &[u8]) -> RespValue {
    RespValue::BulkString(bytes.to_vec())
}

fn parse_f64(arg: &[u8]) -> Option<f64> {
    match std::str::from_utf8(arg).ok()? {
        "+inf" | "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        s => s.parse().ok(),
    }
}

/// Score bound: value and whether it is exclusive
fn parse_bound(arg: &[u8]) -> Option<(f64, bool)> {
    match arg.strip_prefix(b"(") {
        Some(rest) => Some((parse_f64(rest)?, true)),
        None => Some((parse_f64(arg)?, false)),
    }
}

fn within(score: f64, min: (f64, bool), max: (f64, bool)) -> bool {
    let above = if min.1 { score > min.0 } else { score >= min.0 };
    let below = if max.1 { score < max.0 } else { score <= max.0 };
    above && below
}

/// One simulated node
#[derive(Default)]
pub struct MockServer {
    pub address: Option<ServerAddress>,
    strings: HashMap<Vec<u8>, Vec<u8>>,
    zsets: HashMap<Vec<u8>, Vec<(f64, Vec<u8>)>>,
    /// Slots this node serves; `None` serves every slot
    owned: Option<Vec<(u16, u16)>>,
    /// Where MOVED points for slots owned elsewhere
    routes: Vec<((u16, u16), ServerAddress)>,
    /// Slots being migrated away, answered with ASK
    pub migrating: HashMap<u16, ServerAddress>,
    cluster_nodes: Option<String>,
    /// Number of execute/execute_pipeline calls received
    pub round_trips: usize,
    /// Every command received, formatted as "NAME arg ..."
    pub log: Vec<String>,
}

impl MockServer {
    pub fn standalone() -> SharedServer {
        Arc::new(Mutex::new(MockServer::default()))
    }

    pub fn connect(server: &SharedServer) -> Box<dyn ControlPlane> {
        Box::new(MockConnection {
            server: Arc::clone(server),
            queued: None,
            asking: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.strings.get(key.as_bytes()).cloned()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.strings
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    pub fn zset_len(&self, key: &str) -> usize {
        self.zsets.get(key.as_bytes()).map_or(0, Vec::len)
    }

    /// Insert a member with an explicit score, bypassing commands
    pub fn zadd_raw(&mut self, key: &str, score: f64, member: &[u8]) {
        let set = self.zsets.entry(key.as_bytes().to_vec()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_vec()));
        set.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    }

    pub fn key_count(&self) -> usize {
        self.strings.len() + self.zsets.len()
    }

    /// Reply to redirect a command, if this node does not serve its key
    fn redirect_for(&self, command: &Command, asking: bool) -> Option<RespValue> {
        let owned = self.owned.as_ref()?;
        let slot = slot_for_key(command.routing_key()?);

        if let Some(target) = self.migrating.get(&slot) {
            return Some(err(&format!("ASK {} {}", slot, target)));
        }
        if owned.iter().any(|&(s, e)| (s..=e).contains(&slot)) || asking {
            return None;
        }
        let target = self
            .routes
            .iter()
            .find(|((s, e), _)| (*s..=*e).contains(&slot))
            .map(|(_, addr)| addr.to_string())?;
        Some(err(&format!("MOVED {} {}", slot, target)))
    }

    fn apply(&mut self, command: &Command) -> RespValue {
        let args = command.args();
        let arg = |idx: usize| args.get(idx).map(Vec::as_slice).unwrap_or_default();

        if command.name().starts_with('Z') && self.strings.contains_key(arg(0)) {
            return err("WRONGTYPE Operation against a key holding the wrong kind of value");
        }

        match command.name() {
            "PING" => RespValue::SimpleString("PONG".to_string()),
            "ECHO" => bulk(arg(0)),
            "SET" => {
                self.strings.insert(arg(0).to_vec(), arg(1).to_vec());
                ok()
            }
            "GET" => match self.strings.get(arg(0)) {
                Some(v) => bulk(v),
                None => RespValue::Null,
            },
            "INCR" | "INCRBY" => {
                let by = if command.name() == "INCR" {
                    Some(1)
                } else {
                    std::str::from_utf8(arg(1)).ok().and_then(|s| s.parse().ok())
                };
                let current = match self.strings.get(arg(0)) {
                    Some(v) => std::str::from_utf8(v).ok().and_then(|s| s.parse::<i64>().ok()),
                    None => Some(0),
                };
                match (current, by) {
                    (Some(current), Some(by)) => {
                        let next = current + by;
                        self.strings
                            .insert(arg(0).to_vec(), next.to_string().into_bytes());
                        RespValue::Integer(next)
                    }
                    _ => err("ERR value is not an integer or out of range"),
                }
            }
            "DEL" | "UNLINK" => {
                let removed = args
                    .iter()
                    .filter(|k| {
                        let s = self.strings.remove(k.as_slice()).is_some();
                        let z = self.zsets.remove(k.as_slice()).is_some();
                        s || z
                    })
                    .count();
                RespValue::Integer(removed as i64)
            }
            "EXISTS" => RespValue::Integer(
                args.iter()
                    .filter(|k| {
                        self.strings.contains_key(k.as_slice()) || self.zsets.contains_key(k.as_slice())
                    })
                    .count() as i64,
            ),
            "FLUSHALL" | "FLUSHDB" => {
                self.strings.clear();
                self.zsets.clear();
                ok()
            }
            "DBSIZE" => RespValue::Integer(self.key_count() as i64),
            "ZADD" => {
                let mut added = 0;
                for pair in args[1.min(args.len())..].chunks(2) {
                    let (Some(score), Some(member)) =
                        (pair.first().and_then(|s| parse_f64(s)), pair.get(1))
                    else {
                        return err("ERR syntax error");
                    };
                    let key = std::str::from_utf8(arg(0)).unwrap_or_default().to_string();
                    let existed = self
                        .zsets
                        .get(arg(0))
                        .is_some_and(|set| set.iter().any(|(_, m)| m == member));
                    self.zadd_raw(&key, score, member);
                    if !existed {
                        added += 1;
                    }
                }
                RespValue::Integer(added)
            }
            "ZREM" => {
                let Some(set) = self.zsets.get_mut(arg(0)) else {
                    return RespValue::Integer(0);
                };
                let before = set.len();
                set.retain(|(_, m)| !args[1..].contains(m));
                let removed = before - set.len();
                if set.is_empty() {
                    self.zsets.remove(arg(0));
                }
                RespValue::Integer(removed as i64)
            }
            "ZREMRANGEBYSCORE" => {
                let (Some(min), Some(max)) = (parse_bound(arg(1)), parse_bound(arg(2))) else {
                    return err("ERR min or max is not a float");
                };
                let Some(set) = self.zsets.get_mut(arg(0)) else {
                    return RespValue::Integer(0);
                };
                let before = set.len();
                set.retain(|(score, _)| !within(*score, min, max));
                let removed = before - set.len();
                if set.is_empty() {
                    self.zsets.remove(arg(0));
                }
                RespValue::Integer(removed as i64)
            }
            "ZRANGEBYSCORE" => {
                let (Some(min), Some(max)) = (parse_bound(arg(1)), parse_bound(arg(2))) else {
                    return err("ERR min or max is not a float");
                };
                RespValue::Array(
                    self.zsets
                        .get(arg(0))
                        .into_iter()
                        .flatten()
                        .filter(|(score, _)| within(*score, min, max))
                        .map(|(_, m)| bulk(m))
                        .collect(),
                )
            }
            "ZRANGE" => RespValue::Array(
                self.zsets
                    .get(arg(0))
                    .into_iter()
                    .flatten()
                    .map(|(_, m)| bulk(m))
                    .collect(),
            ),
            "ZCARD" => RespValue::Integer(self.zsets.get(arg(0)).map_or(0, Vec::len) as i64),
            "ZSCORE" => self
                .zsets
                .get(arg(0))
                .and_then(|set| set.iter().find(|(_, m)| m == arg(1)))
                .map(|(score, _)| bulk(score.to_string().as_bytes()))
                .unwrap_or(RespValue::Null),
            "CLUSTER" if arg(0).eq_ignore_ascii_case(b"NODES") => match &self.cluster_nodes {
                Some(text) => bulk(text.as_bytes()),
                None => err("ERR This instance has cluster support disabled"),
            },
            name => err(&format!("ERR unknown command '{}'", name)),
        }
    }
}

/// Per-connection state over a shared node
struct MockConnection {
    server: SharedServer,
    /// Commands queued since MULTI; `Err` once a queued command was rejected
    queued: Option<Result<Vec<Command>, ()>>,
    asking: bool,
}

impl MockConnection {
    fn handle(&mut self, server: &mut MockServer, command: &Command) -> RespValue {
        server.log.push(format!("{:?}", command));

        match command.name() {
            "ASKING" => {
                self.asking = true;
                return ok();
            }
            "MULTI" if self.queued.is_some() => return err("ERR MULTI calls can not be nested"),
            "MULTI" => {
                self.queued = Some(Ok(Vec::new()));
                return ok();
            }
            "DISCARD" => {
                return match self.queued.take() {
                    Some(_) => ok(),
                    None => err("ERR DISCARD without MULTI"),
                };
            }
            "EXEC" => {
                return match self.queued.take() {
                    None => err("ERR EXEC without MULTI"),
                    Some(Err(())) => {
                        err("EXECABORT Transaction discarded because of previous errors.")
                    }
                    Some(Ok(commands)) => RespValue::Array(
                        commands.iter().map(|c| server.apply(c)).collect(),
                    ),
                };
            }
            _ => {}
        }

        let asking = std::mem::take(&mut self.asking);
        if let Some(redirect) = server.redirect_for(command, asking) {
            if let Some(queued) = self.queued.as_mut() {
                *queued = Err(());
            }
            return redirect;
        }

        match self.queued.as_mut() {
            Some(queued) if !SUPPORTED.contains(&command.name()) => {
                *queued = Err(());
                err(&format!("ERR unknown command '{}'", command.name()))
            }
            Some(Ok(queued)) => {
                queued.push(command.clone());
                RespValue::SimpleString("QUEUED".to_string())
            }
            Some(Err(())) => RespValue::SimpleString("QUEUED".to_string()),
            None => server.apply(command),
        }
    }
}

impl ControlPlane for MockConnection {
    fn execute(&mut self, command: &Command) -> io::Result<RespValue> {
        let server = Arc::clone(&self.server);
        let mut server = server.lock();
        server.round_trips += 1;
        Ok(self.handle(&mut server, command))
    }

    fn execute_pipeline(&mut self, commands: &[Command]) -> io::Result<Vec<RespValue>> {
        let server = Arc::clone(&self.server);
        let mut server = server.lock();
        server.round_trips += 1;
        Ok(commands
            .iter()
            .map(|command| self.handle(&mut server, command))
            .collect())
    }
}

/// Hands out connections to a fixed set of mock nodes
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<ServerAddress, SharedServer>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn with_server(mut self, address: ServerAddress, server: SharedServer) -> Self {
        server.lock().address = Some(address.clone());
        self.servers.insert(address, server);
        self
    }

    /// Standalone nodes at 127.0.0.1:6379, :6380, ...
    pub fn standalone(count: u16) -> Self {
        (0..count).fold(Self::default(), |connector, i| {
            connector.with_server(
                ServerAddress::new("127.0.0.1", 6379 + i),
                MockServer::standalone(),
            )
        })
    }

    /// Cluster of primaries at 127.0.0.1:7000, :7001, ... splitting the
    /// slot space evenly
    pub fn cluster(primaries: u16) -> Self {
        let per_node = SLOT_COUNT / primaries;
        let nodes: Vec<(ServerAddress, (u16, u16))> = (0..primaries)
            .map(|i| {
                let start = i * per_node;
                let end = if i + 1 == primaries {
                    SLOT_COUNT - 1
                } else {
                    start + per_node - 1
                };
                (ServerAddress::new("127.0.0.1", 7000 + i), (start, end))
            })
            .collect();

        let text: String = nodes
            .iter()
            .enumerate()
            .map(|(i, (addr, (start, end)))| {
                format!(
                    "{:040x} {}@{} master - 0 0 {} connected {}-{}\n",
                    i + 1,
                    addr,
                    addr.port + 10000,
                    i + 1,
                    start,
                    end
                )
            })
            .collect();

        let routes: Vec<((u16, u16), ServerAddress)> =
            nodes.iter().map(|(a, r)| (*r, a.clone())).collect();

        nodes.iter().fold(Self::default(), |connector, (addr, range)| {
            let server = MockServer {
                owned: Some(vec![*range]),
                routes: routes.clone(),
                cluster_nodes: Some(text.clone()),
                ..MockServer::default()
            };
            connector.with_server(addr.clone(), Arc::new(Mutex::new(server)))
        })
    }

    pub fn server(&self, address: &ServerAddress) -> SharedServer {
        Arc::clone(&self.servers[address])
    }

    pub fn addresses(&self) -> Vec<ServerAddress> {
        let mut addresses: Vec<_> = self.servers.keys().cloned().collect();
        addresses.sort_by_key(|a| a.port);
        addresses
    }

    /// Move `slot` to the node at `to`, updating every node's view
    pub fn move_slot(&self, slot: u16, to: &ServerAddress) {
        for (addr, server) in &self.servers {
            let mut server = server.lock();
            if let Some(owned) = server.owned.as_mut() {
                if addr == to {
                    owned.push((slot, slot));
                } else {
                    owned.retain(|&(s, e)| !(s == slot && e == slot));
                    if let Some(pos) = owned.iter().position(|&(s, e)| (s..=e).contains(&slot)) {
                        let (s, e) = owned.remove(pos);
                        if s < slot {
                            owned.push((s, slot - 1));
                        }
                        if slot < e {
                            owned.push((slot + 1, e));
                        }
                    }
                }
            }
            server.routes.insert(0, ((slot, slot), to.clone()));
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ControlPlane>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.servers.get(address) {
            Some(server) => Ok(MockServer::connect(server)),
            None => Err(ConnectionError::ConnectFailed {
                host: address.host.clone(),
                port: address.port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "no mock server"),
            }),
        }
    }
}
