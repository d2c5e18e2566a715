//! Cluster topology snapshot and slot hashing

use super::node::{parse_cluster_node_line, ClusterNode};
use crate::config::ServerAddress;
use crate::utils::ClusterError;

pub const SLOT_COUNT: u16 = 16384;

/// Cluster topology snapshot
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    /// All nodes in the cluster
    pub nodes: Vec<ClusterNode>,
    /// Slot to node index mapping
    slot_map: Vec<Option<usize>>,
    /// Primary node indices, ordered by first owned slot
    primary_indices: Vec<usize>,
}

impl ClusterTopology {
    /// Parse CLUSTER NODES response obtained from `seed`
    pub fn from_cluster_nodes(response: &str, seed: &ServerAddress) -> Result<Self, ClusterError> {
        let mut nodes = Vec::new();
        let mut slot_map = vec![None; SLOT_COUNT as usize];

        for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let node = parse_cluster_node_line(line, &seed.host)
                .ok_or_else(|| ClusterError::ParseFailed(line.to_string()))?;

            if node.is_primary {
                let idx = nodes.len();
                for &(start, end) in &node.slots {
                    for slot in start..=end.min(SLOT_COUNT - 1) {
                        slot_map[slot as usize] = Some(idx);
                    }
                }
            }
            nodes.push(node);
        }

        let mut primary_indices: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_primary && !n.slots.is_empty())
            .map(|(idx, _)| idx)
            .collect();

        if primary_indices.is_empty() {
            return Err(ClusterError::NoPrimaries);
        }

        primary_indices.sort_by_key(|&idx| nodes[idx].first_slot().unwrap_or(u16::MAX));

        Ok(Self {
            nodes,
            slot_map,
            primary_indices,
        })
    }

    /// Get node for slot
    pub fn node_for_slot(&self, slot: u16) -> Option<&ClusterNode> {
        self.slot_map
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|idx| &self.nodes[idx])
    }

    /// Address of the primary owning the key's slot
    pub fn address_for_key(&self, key: &[u8]) -> Result<&ServerAddress, ClusterError> {
        let slot = slot_for_key(key);
        self.node_for_slot(slot)
            .map(|n| &n.address)
            .ok_or(ClusterError::UnassignedSlot(slot))
    }

    /// Get all primary nodes
    pub fn primaries(&self) -> impl Iterator<Item = &ClusterNode> {
        self.primary_indices.iter().map(|&idx| &self.nodes[idx])
    }

    /// Get number of primary nodes
    pub fn num_primaries(&self) -> usize {
        self.primary_indices.len()
    }

    /// Record a MOVED redirect without a full refresh
    pub fn assign_slot(&mut self, slot: u16, address: &ServerAddress) {
        if let Some(idx) = self.nodes.iter().position(|n| n.address == *address) {
            if let Some(entry) = self.slot_map.get_mut(slot as usize) {
                *entry = Some(idx);
            }
        }
    }
}

/// Calculate slot for key using CRC16, honouring `{hash tags}`
pub fn slot_for_key(key: &[u8]) -> u16 {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            if end > 0 {
                return crc16(&key[start + 1..start + 1 + end]) % SLOT_COUNT;
            }
        }
    }
    crc16(key) % SLOT_COUNT
}

/// CRC16 implementation for cluster slot calculation (XMODEM)
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
