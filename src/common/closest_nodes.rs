use std::vec::IntoIter;

use crate::common::{Id, Node, MAX_BUCKET_SIZE_K};

/// Nodes sorted by their distance to a target, without duplicate Ids.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Node>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K * 2),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The closest node to the target, if any.
    pub fn first(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|n| n.id == *id)
    }

    // === Public Methods ===

    /// Insert a node at its sorted position.
    ///
    /// Returns `false` if a node with the same Id is already present.
    pub fn add(&mut self, node: Node) -> bool {
        if self.contains(&node.id) {
            return false;
        }

        let seek = node.id.xor(&self.target);

        let pos = match self
            .nodes
            .binary_search_by(|node| node.id.xor(&self.target).cmp(&seek))
        {
            Ok(pos) | Err(pos) => pos,
        };

        self.nodes.insert(pos, node);

        true
    }

    /// Remove the node with this Id, if present.
    pub fn remove(&mut self, id: &Id) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.id == *id)?;

        Some(self.nodes.remove(index))
    }

    /// Keep only the `len` closest nodes.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len)
    }

    pub fn to_vec(&self) -> Vec<Node> {
        self.nodes.clone()
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Node;
    type IntoIter = IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
