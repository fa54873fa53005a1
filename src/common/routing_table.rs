//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::common::{ClosestNodes, Id, Node};

/// K = the default maximum size of a k-bucket, and the number of closest nodes a lookup tracks.
pub const MAX_BUCKET_SIZE_K: usize = 8;

/// Consecutive failed requests after which a node is considered stale.
pub const MAX_FAILED_REQUESTS: u8 = 2;
/// A node not seen for this long is considered stale.
pub const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
pub struct RoutingTable {
    id: Id,
    buckets: BTreeMap<u16, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: BTreeMap::new(),
        }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Insert or refresh a node, returns `true` if the node is in the table afterwards.
    ///
    /// A full bucket only makes room by replacing a stale entry, fresh entries
    /// are never evicted.
    pub fn add(&mut self, node: Node) -> bool {
        let distance = self.id.distance(node.id());

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        self.buckets.entry(distance).or_default().add(node)
    }

    /// Record a failed request to this node, making it eligible for replacement.
    pub fn mark_failed(&mut self, node_id: &Id) {
        let distance = self.id.distance(node_id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.mark_failed(node_id)
        }
    }

    /// Remove a node from this routing table.
    pub fn remove(&mut self, node_id: &Id) {
        let distance = self.id.distance(node_id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(node_id);

            if bucket.is_empty() {
                self.buckets.remove(&distance);
            }
        }
    }

    /// Return up to [MAX_BUCKET_SIZE_K] nodes closest to the target, closest first.
    ///
    /// Nodes sharing the target's bucket come first by construction of the XOR
    /// metric, neighbouring buckets fill in when that bucket is under-full.
    pub fn closest(&self, target: &Id) -> Vec<Node> {
        let mut closest = ClosestNodes::new(*target);

        for node in self.nodes() {
            closest.add(node.clone());
        }

        closest.truncate(MAX_BUCKET_SIZE_K);
        closest.to_vec()
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.entries.len())
    }

    /// Returns an iterator over the nodes in this routing table, nearest buckets first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.values().flat_map(|bucket| bucket.nodes())
    }

    /// Export an owned vector of nodes from this routing table.
    pub fn to_owned_nodes(&self) -> Vec<Node> {
        self.nodes().cloned().collect()
    }

    /// Turn this routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Vec<String> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.entries.iter())
            .filter(|entry| !entry.is_stale())
            .map(|entry| entry.node.address.to_string())
            .collect()
    }

    pub fn contains(&self, node_id: &Id) -> bool {
        let distance = self.id.distance(node_id);

        self.buckets
            .get(&distance)
            .map(|bucket| bucket.contains(node_id))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    last_seen: Instant,
    failed_requests: u8,
}

impl Entry {
    fn new(node: Node) -> Self {
        Entry {
            node,
            last_seen: Instant::now(),
            failed_requests: 0,
        }
    }

    fn is_stale(&self) -> bool {
        self.failed_requests >= MAX_FAILED_REQUESTS || self.last_seen.elapsed() > STALE_AFTER
    }
}

/// Kbuckets are similar to LRU caches that replace stale nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug, Clone)]
pub struct KBucket {
    /// Nodes in the k-bucket, sorted by the least recently seen.
    entries: Vec<Entry>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            entries: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: Node) -> bool {
        if let Some(index) = self.position(incoming.id()) {
            // Newest observed address wins, and the node moves to the most recently seen end.
            self.entries.remove(index);
            self.entries.push(Entry::new(incoming));

            true
        } else if self.entries.len() < MAX_BUCKET_SIZE_K {
            self.entries.push(Entry::new(incoming));

            true
        } else if let Some(index) = self.entries.iter().position(Entry::is_stale) {
            // Replace the least recently seen stale node.
            self.entries.remove(index);
            self.entries.push(Entry::new(incoming));

            true
        } else {
            false
        }
    }

    pub fn mark_failed(&mut self, id: &Id) {
        if let Some(index) = self.position(id) {
            let entry = &mut self.entries[index];
            entry.failed_requests = entry.failed_requests.saturating_add(1);
        }
    }

    pub fn remove(&mut self, id: &Id) {
        self.entries.retain(|entry| entry.node.id() != id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().map(|entry| &entry.node)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &Id) -> Option<usize> {
        self.entries.iter().position(|entry| entry.node.id() == id)
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use crate::common::{Id, KBucket, Node, RoutingTable, ID_SIZE, MAX_BUCKET_SIZE_K};

    use super::MAX_FAILED_REQUESTS;

    /// Nodes with Ids `[i, 0, 0, ..]`, all in distinct positions of the key space.
    fn unique(i: u8) -> Node {
        let mut bytes = [0; ID_SIZE];
        bytes[0] = i;

        Node::new(Id::from(bytes), SocketAddr::from(([127, 0, 0, 1], i as u16 + 1)))
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.add(Node::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn to_owned_nodes() {
        let mut table = RoutingTable::new(Id::random());

        let mut expected_nodes: Vec<Node> = vec![];

        for _ in 0..MAX_BUCKET_SIZE_K {
            expected_nodes.push(Node::random());
        }

        for node in &expected_nodes {
            table.add(node.clone());
        }

        let mut sorted_table = table.to_owned_nodes();
        sorted_table.sort_by(|a, b| a.id().cmp(b.id()));

        let mut sorted_expected = expected_nodes.to_vec();
        sorted_expected.sort_by(|a, b| a.id().cmp(b.id()));

        assert_eq!(sorted_table, sorted_expected);
    }

    #[test]
    fn contains_and_remove() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();

        assert!(!table.contains(node.id()));

        table.add(node.clone());
        assert!(table.contains(node.id()));

        table.remove(node.id());
        assert!(!table.contains(node.id()));
        assert!(table.is_empty());
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let node1 = Node::random();
        let node2 = Node::new(*node1.id(), node1.address());

        table.add(node1);
        table.add(node2);

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn newest_address_wins() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();
        let moved = Node::new(node.id, SocketAddr::from(([10, 1, 2, 3], 4444)));

        table.add(node);
        table.add(moved.clone());

        assert_eq!(table.size(), 1);
        assert_eq!(table.to_owned_nodes(), vec![moved]);
    }

    #[test]
    fn should_not_add_self() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::new(*table.id(), SocketAddr::from(([0, 0, 0, 0], 0)));

        assert!(!table.add(node));
        assert!(table.is_empty())
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = KBucket::new();

        for i in 0..MAX_BUCKET_SIZE_K {
            assert!(bucket.add(Node::random()), "Failed to add node {i}");
        }

        assert!(!bucket.add(Node::random()));
        assert_eq!(bucket.len(), MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn full_bucket_replaces_stale_node() {
        let mut bucket = KBucket::new();

        let nodes: Vec<Node> = (0..MAX_BUCKET_SIZE_K).map(|_| Node::random()).collect();
        for node in &nodes {
            bucket.add(node.clone());
        }

        let unresponsive = nodes[3].id;
        let incoming = Node::random();

        // One failure is not enough.
        bucket.mark_failed(&unresponsive);
        assert!(!bucket.add(incoming.clone()));

        for _ in 1..MAX_FAILED_REQUESTS {
            bucket.mark_failed(&unresponsive);
        }

        assert!(bucket.add(incoming.clone()));
        assert_eq!(bucket.len(), MAX_BUCKET_SIZE_K);
        assert!(!bucket.contains(&unresponsive));
        assert!(bucket.contains(incoming.id()));

        // The replacement is the most recently seen node.
        assert_eq!(bucket.nodes().last(), Some(&incoming));
    }

    #[test]
    fn refresh_resets_failures() {
        let mut bucket = KBucket::new();

        let nodes: Vec<Node> = (0..MAX_BUCKET_SIZE_K).map(|_| Node::random()).collect();
        for node in &nodes {
            bucket.add(node.clone());
        }

        for _ in 0..MAX_FAILED_REQUESTS {
            bucket.mark_failed(nodes[0].id());
        }

        // Seen again before anyone claimed its slot.
        assert!(bucket.add(nodes[0].clone()));

        assert!(!bucket.add(Node::random()));
        assert!(bucket.contains(nodes[0].id()));
    }

    #[test]
    fn closest() {
        let local = unique(0);
        let mut table = RoutingTable::new(local.id);

        for i in 1..=40 {
            table.add(unique(i));
        }

        let mut target = [0; ID_SIZE];
        target[0] = 0b0001_0011;
        let target = Id::from(target);

        let closest = table.closest(&target);

        assert_eq!(closest.len(), MAX_BUCKET_SIZE_K);

        let first_bytes: Vec<u8> = closest.iter().map(|n| n.id.as_bytes()[0]).collect();

        assert_eq!(first_bytes, vec![19, 18, 17, 16, 23, 22, 21, 20]);
    }

    #[test]
    fn closest_from_small_table() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();
        table.add(node.clone());

        assert_eq!(table.closest(&Id::random()), vec![node]);
    }
}
