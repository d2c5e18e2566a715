//! Cluster topology discovery
//!
//! - Topology discovery via CLUSTER NODES
//! - Slot mapping and CRC16 calculation

pub mod node;
pub mod topology;

pub use node::ClusterNode;
pub use topology::{slot_for_key, ClusterTopology, SLOT_COUNT};
