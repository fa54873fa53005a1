use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

use crate::common::{Id, Node};

use super::Rpc;

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddr,
    nodes: Vec<Node>,
    stored_hashes: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }
    /// Local UDP socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    /// Snapshot of the nodes in the routing table, nearest buckets first.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
    pub fn routing_table_size(&self) -> usize {
        self.nodes.len()
    }
    /// Number of distinct content ids this node stores announcements for.
    pub fn stored_hashes(&self) -> usize {
        self.stored_hashes
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: *rpc.id(),
            local_addr: rpc.local_addr(),
            nodes: rpc.routing_table().to_owned_nodes(),
            stored_hashes: rpc.announcements().count_stored_hashes(),
        }
    }
}

impl Display for Info {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "node {} @ {}", self.id, self.local_addr)?;
        writeln!(f, "stored hashes: {}", self.stored_hashes)?;
        writeln!(f, "routing table: {} nodes", self.nodes.len())?;

        for node in &self.nodes {
            writeln!(
                f,
                "  {} {} (distance {})",
                node.id,
                node.address,
                self.id.distance(&node.id)
            )?;
        }

        Ok(())
    }
}
