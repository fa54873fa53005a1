//! Manage nodes announcing content ids.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rand::{seq::SliceRandom, thread_rng};
use tracing::error;

use crate::common::{Id, Node};

/// Content ids, and the nodes that announced they hold them.
///
/// Safe for concurrent use, readers never observe partial updates.
#[derive(Debug, Default)]
pub struct AnnouncementStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// content id -> announcing node ids
    hashes: HashMap<Id, HashSet<Id>>,
    /// node id -> latest contact info
    node_info: HashMap<Id, Node>,
}

impl AnnouncementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` holds `content_id`.
    ///
    /// Repeating an announcement is a no-op, except that a changed address
    /// replaces the previous contact info of that node for all its content.
    pub fn upsert(&self, content_id: Id, node: Node) {
        let mut inner = self.inner.write();

        inner.hashes.entry(content_id).or_default().insert(node.id);
        inner.node_info.insert(node.id, node);
    }

    /// All nodes that announced `content_id`, in no particular order.
    pub fn get(&self, content_id: &Id) -> Vec<Node> {
        let inner = self.inner.read();

        match inner.hashes.get(content_id) {
            Some(ids) => ids.iter().filter_map(|id| inner.node(id)).collect(),
            None => Vec::new(),
        }
    }

    /// Up to `limit` random nodes that announced `content_id`.
    pub fn get_random(&self, content_id: &Id, limit: usize) -> Vec<Node> {
        let nodes = self.get(content_id);

        if nodes.len() <= limit {
            return nodes;
        }

        nodes
            .choose_multiple(&mut thread_rng(), limit)
            .cloned()
            .collect()
    }

    /// Number of distinct content ids with at least one announcer.
    pub fn count_stored_hashes(&self) -> usize {
        self.inner.read().hashes.len()
    }

    /// Forget that `node_id` announced `content_id`.
    ///
    /// Returns `true` if the announcement existed.
    pub fn remove(&self, content_id: &Id, node_id: &Id) -> bool {
        let mut inner = self.inner.write();

        let Some(ids) = inner.hashes.get_mut(content_id) else {
            return false;
        };

        let removed = ids.remove(node_id);

        if ids.is_empty() {
            inner.hashes.remove(content_id);
        }

        if removed && !inner.hashes.values().any(|ids| ids.contains(node_id)) {
            inner.node_info.remove(node_id);
        }

        removed
    }
}

impl Inner {
    fn node(&self, id: &Id) -> Option<Node> {
        let node = self.node_info.get(id).cloned();

        debug_assert!(node.is_some(), "announcer {id} has no contact info");

        if node.is_none() {
            error!(?id, "Announcer has no contact info, skipping");
        }

        node
    }
}
