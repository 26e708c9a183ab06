//! Cluster peers.
//!
//! Peers are configured as repeated `Node = <url>` keys under `[cluster]`.
//! Each URL carries the peer's display name, shared secret and enabled
//! flag as query parameters.

pub mod node;

pub use node::{parse_node, ClusterNode, ClusterNodeError};
