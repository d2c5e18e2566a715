//! Cluster node representation

use crate::config::ServerAddress;

/// One line of CLUSTER NODES
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Node ID from CLUSTER NODES
    pub id: String,
    pub address: ServerAddress,
    /// Is this a primary node?
    pub is_primary: bool,
    /// Is this the node that answered CLUSTER NODES?
    pub is_myself: bool,
    /// Primary node ID (if replica)
    pub primary_id: Option<String>,
    /// Owned slot ranges, inclusive
    pub slots: Vec<(u16, u16)>,
    /// Node flags (fail, handshake, etc.)
    pub flags: Vec<String>,
    /// Link state is "connected"
    pub connected: bool,
}

impl ClusterNode {
    /// Check if node is available
    pub fn is_available(&self) -> bool {
        self.connected && !self.flags.iter().any(|f| f == "fail" || f == "handshake")
    }

    pub fn owns_slot(&self, slot: u16) -> bool {
        self.slots.iter().any(|&(start, end)| (start..=end).contains(&slot))
    }

    /// Lowest owned slot, used to order primaries
    pub fn first_slot(&self) -> Option<u16> {
        self.slots.iter().map(|&(start, _)| start).min()
    }
}

/// Parse a line from CLUSTER NODES response
///
/// Format: `<id> <ip:port@cport> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> <slot> ... <slot>`
///
/// A node that has not learned its own address reports an empty host
/// (`:7000@17000`); `fallback_host` is used in that case.
pub fn parse_cluster_node_line(line: &str, fallback_host: &str) -> Option<ClusterNode> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let (host, port) = parse_node_address(parts[1])?;
    let host = if host.is_empty() {
        fallback_host.to_string()
    } else {
        host
    };

    let flags: Vec<String> = parts[2].split(',').map(String::from).collect();
    let has_flag = |name: &str| flags.iter().any(|f| f == name);

    let is_primary = has_flag("master");
    let is_myself = has_flag("myself");
    let primary_id = (!is_primary && parts[3] != "-").then(|| parts[3].to_string());

    let slots = if is_primary {
        parts[8..].iter().filter_map(|s| parse_slot_range(s)).collect()
    } else {
        Vec::new()
    };

    Some(ClusterNode {
        id: parts[0].to_string(),
        address: ServerAddress::new(host, port),
        is_primary,
        is_myself,
        primary_id,
        slots,
        connected: parts[7] == "connected",
        flags,
    })
}

/// Parse node address from CLUSTER NODES
/// Formats: "host:port@cport", "host:port", "host:port@cport,hostname"
fn parse_node_address(addr: &str) -> Option<(String, u16)> {
    let addr = addr.split(',').next().unwrap_or(addr);
    let host_port = addr.split('@').next().unwrap_or(addr);
    let (host, port) = host_port.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;

    Some((host.to_string(), port))
}

/// Parse slot range: "0-5460" or "0"
fn parse_slot_range(s: &str) -> Option<(u16, u16)> {
    // Migrating/importing markers like "[123->-node_id]"
    if s.starts_with('[') {
        return None;
    }

    match s.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot: u16 = s.parse().ok()?;
            Some((slot, slot))
        }
    }
}
