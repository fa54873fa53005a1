//! Struct and implementation of the Node entry in the Kademlia routing table
use std::net::SocketAddr;

use crate::common::Id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A participant's identity plus its last known network address.
///
/// Two nodes are the same participant iff their `id` matches, the address
/// may change between observations.
pub struct Node {
    pub id: Id,
    pub address: SocketAddr,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> Node {
        Node { id, address }
    }

    /// Creates a node with a random Id on a local address, for testing.
    pub fn random() -> Node {
        Node {
            id: Id::random(),
            address: SocketAddr::from(([127, 0, 0, 1], rand::random::<u16>().max(1))),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns `true` if both nodes have the same Id.
    pub fn same_participant(&self, other: &Node) -> bool {
        self.id == other.id
    }
}
