//! De Bruijn graph substrate: an arena of k-mer nodes addressed by stable
//! indices, with orientation-tagged left/right extension tables.
//!
//! Concurrency contract: extension tables sit behind a per-node `RwLock` so
//! many walks can read while adjacency repair takes targeted write locks; the
//! soft delete mark and the committed delete flag are atomics so racing walks
//! may mark the same node without coordination. Structural commits (promoting
//! marks, dropping edges to dead neighbours) happen only at round boundaries,
//! so in-round readers observe a consistent topology.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Stable index of a node within its graph's arena.
pub type NodeIx = usize;

/// Which extension table an edge lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// One directed adjacency: the neighbour index and whether the neighbour is
/// read on the same strand (`false` = reverse complement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    pub to: NodeIx,
    pub same_orientation: bool,
}

#[derive(Debug, Default)]
struct EdgeTables {
    left: Vec<Extension>,
    right: Vec<Extension>,
}

impl EdgeTables {
    fn side(&self, side: Side) -> &Vec<Extension> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<Extension> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// One k-mer node: packed canonical k-mer, observed coverage, extension
/// tables and the two-stage deletion flags.
#[derive(Debug)]
pub struct Node {
    kmer: u64,
    kmer_count: u32,
    edges: RwLock<EdgeTables>,
    marked_for_delete: AtomicBool,
    deleted: AtomicBool,
}

impl Node {
    fn new(kmer: u64, kmer_count: u32) -> Self {
        Self {
            kmer,
            kmer_count,
            edges: RwLock::new(EdgeTables::default()),
            marked_for_delete: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    /// Packed canonical form of the node's k-mer.
    pub fn kmer(&self) -> u64 {
        self.kmer
    }

    /// Observed coverage of the k-mer.
    pub fn kmer_count(&self) -> u32 {
        self.kmer_count
    }

    /// Left and right extension counts under one read lock.
    pub fn extension_counts(&self) -> (usize, usize) {
        let edges = self.edges.read().expect("edge table lock poisoned");
        (edges.left.len(), edges.right.len())
    }

    /// Snapshot of one extension table.
    pub fn extensions(&self, side: Side) -> Vec<Extension> {
        let edges = self.edges.read().expect("edge table lock poisoned");
        edges.side(side).clone()
    }

    /// Snapshot of both tables, left then right.
    pub fn all_extensions(&self) -> Vec<Extension> {
        let edges = self.edges.read().expect("edge table lock poisoned");
        let mut all = edges.left.clone();
        all.extend_from_slice(&edges.right);
        all
    }

    /// Same-direction snapshot and opposite-direction count for one walk
    /// step, taken under a single read lock.
    pub fn directed_extensions(&self, same_direction: Side) -> (Vec<Extension>, usize) {
        let edges = self.edges.read().expect("edge table lock poisoned");
        (
            edges.side(same_direction).clone(),
            edges.side(same_direction.opposite()).len(),
        )
    }

    /// Soft delete mark; idempotent and safe for racing writers. Returns
    /// `true` if this call was the one that set the mark.
    pub fn mark_for_delete(&self) -> bool {
        !self.marked_for_delete.swap(true, Ordering::AcqRel)
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Promote the node to committed-deleted. Only the round-boundary commit
    /// and bulk removal call this.
    pub(crate) fn commit_delete(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Remove every edge to `to`, both sides, under one write lock. Used
    /// during adjacency repair, where two walks may target the same table.
    pub fn remove_extension(&self, to: NodeIx) {
        let mut edges = self.edges.write().expect("edge table lock poisoned");
        edges.left.retain(|e| e.to != to);
        edges.right.retain(|e| e.to != to);
    }

    fn add_extension(&self, side: Side, ext: Extension) {
        let mut edges = self.edges.write().expect("edge table lock poisoned");
        let table = edges.side_mut(side);
        if !table.iter().any(|e| e.to == ext.to) {
            table.push(ext);
        }
    }
}

/// The node arena. Nodes are created up front by graph construction; the
/// purger only marks and removes, so indices stay stable for the lifetime of
/// the assembly.
#[derive(Debug)]
pub struct Graph {
    k: usize,
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new(k: usize) -> Self {
        Self { k, nodes: Vec::new() }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Total arena size, deleted slots included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, ix: NodeIx) -> &Node {
        &self.nodes[ix]
    }

    pub fn add_node(&mut self, kmer: u64, kmer_count: u32) -> NodeIx {
        self.nodes.push(Node::new(kmer, kmer_count));
        self.nodes.len() - 1
    }

    /// Add the oriented edge `a --side--> b` together with its reciprocal on
    /// `b`. The reciprocal lands on `b`'s opposite side for a same-strand
    /// edge and on the same side for a reverse-complement edge. Duplicate
    /// neighbours within a table are ignored.
    pub fn link(&self, a: NodeIx, side: Side, b: NodeIx, same_orientation: bool) {
        self.node(a).add_extension(
            side,
            Extension { to: b, same_orientation },
        );
        let reciprocal = if same_orientation { side.opposite() } else { side };
        self.node(b).add_extension(
            reciprocal,
            Extension { to: a, same_orientation },
        );
    }

    /// Indices of all nodes not yet committed-deleted. Safe to call while
    /// concurrent readers walk the graph; deletions only happen at round
    /// boundaries.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeIx> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.is_deleted())
            .map(|(ix, _)| ix)
    }

    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_deleted()).count()
    }

    /// Bulk removal: commit the delete flag and clear the removed nodes' own
    /// tables. Callers must have repaired surviving nodes' adjacency first.
    pub fn remove_nodes<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = NodeIx>,
    {
        for ix in nodes {
            let node = self.node(ix);
            node.commit_delete();
            let mut edges = node.edges.write().expect("edge table lock poisoned");
            edges.left.clear();
            edges.right.clear();
        }
    }

    /// Drop `ix`'s edges to neighbours carrying the soft delete mark. Part of
    /// the erosion commit; runs after marks are promoted.
    pub(crate) fn drop_marked_extensions(&self, ix: NodeIx) {
        let mut edges = self.nodes[ix]
            .edges
            .write()
            .expect("edge table lock poisoned");
        edges
            .left
            .retain(|e| !self.nodes[e.to].is_marked_for_delete());
        edges
            .right
            .retain(|e| !self.nodes[e.to].is_marked_for_delete());
    }
}

/// Pack an ACGT window into 2 bits per base, most significant base first.
/// Returns `None` on any other symbol.
pub fn pack_kmer(seq: &[u8]) -> Option<u64> {
    debug_assert!(seq.len() <= 32);
    let mut packed = 0u64;
    for &base in seq {
        let code = match base {
            b'A' | b'a' => 0,
            b'C' | b'c' => 1,
            b'G' | b'g' => 2,
            b'T' | b't' => 3,
            _ => return None,
        };
        packed = (packed << 2) | code;
    }
    Some(packed)
}

/// Reverse complement of a packed k-mer.
pub fn revcomp_kmer(kmer: u64, k: usize) -> u64 {
    let mut rc = 0u64;
    let mut rest = kmer;
    for _ in 0..k {
        rc = (rc << 2) | (3 - (rest & 3));
        rest >>= 2;
    }
    rc
}

/// Canonical form of a packed k-mer: the lexicographically smaller of the
/// k-mer and its reverse complement, plus whether the as-read form was
/// already canonical.
pub fn canonical_kmer(kmer: u64, k: usize) -> (u64, bool) {
    let rc = revcomp_kmer(kmer, k);
    if rc < kmer {
        (rc, false)
    } else {
        (kmer, true)
    }
}

/// Decode a packed k-mer back into sequence text.
pub fn unpack_kmer(kmer: u64, k: usize) -> String {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut seq = vec![0u8; k];
    let mut rest = kmer;
    for slot in seq.iter_mut().rev() {
        *slot = bases[(rest & 3) as usize];
        rest >>= 2;
    }
    String::from_utf8(seq).expect("decoded k-mer is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_kmers() {
        let packed = pack_kmer(b"ACGT").expect("valid window");
        assert_eq!(packed, 0b00_01_10_11);
        assert_eq!(unpack_kmer(packed, 4), "ACGT");
        assert!(pack_kmer(b"ACNT").is_none());
    }

    #[test]
    fn reverse_complement_round_trips() {
        let packed = pack_kmer(b"ACG").unwrap();
        let rc = revcomp_kmer(packed, 3);
        assert_eq!(unpack_kmer(rc, 3), "CGT");
        assert_eq!(revcomp_kmer(rc, 3), packed);
    }

    #[test]
    fn canonical_prefers_smaller_strand() {
        let fwd = pack_kmer(b"CGT").unwrap();
        let (canon, same) = canonical_kmer(fwd, 3);
        assert_eq!(unpack_kmer(canon, 3), "ACG");
        assert!(!same);

        let (canon, same) = canonical_kmer(pack_kmer(b"ACG").unwrap(), 3);
        assert_eq!(unpack_kmer(canon, 3), "ACG");
        assert!(same);
    }

    #[test]
    fn link_adds_reciprocal_edge() {
        let mut graph = Graph::new(3);
        let a = graph.add_node(0, 1);
        let b = graph.add_node(1, 1);
        graph.link(a, Side::Right, b, true);

        assert_eq!(graph.node(a).extension_counts(), (0, 1));
        assert_eq!(graph.node(b).extension_counts(), (1, 0));
        let back = graph.node(b).extensions(Side::Left);
        assert_eq!(back[0].to, a);
        assert!(back[0].same_orientation);
    }

    #[test]
    fn reverse_complement_link_uses_same_side() {
        let mut graph = Graph::new(3);
        let a = graph.add_node(0, 1);
        let b = graph.add_node(1, 1);
        graph.link(a, Side::Right, b, false);

        // Reciprocal of a reverse-complement right edge is a right edge.
        assert_eq!(graph.node(b).extension_counts(), (0, 1));
        assert_eq!(graph.node(b).extensions(Side::Right)[0].to, a);
    }

    #[test]
    fn duplicate_links_are_ignored() {
        let mut graph = Graph::new(3);
        let a = graph.add_node(0, 1);
        let b = graph.add_node(1, 1);
        graph.link(a, Side::Right, b, true);
        graph.link(a, Side::Right, b, true);
        assert_eq!(graph.node(a).extension_counts(), (0, 1));
    }

    #[test]
    fn mark_is_idempotent() {
        let mut graph = Graph::new(3);
        let a = graph.add_node(0, 1);
        assert!(graph.node(a).mark_for_delete());
        assert!(!graph.node(a).mark_for_delete());
        assert!(graph.node(a).is_marked_for_delete());
        assert!(!graph.node(a).is_deleted());
    }

    #[test]
    fn remove_nodes_clears_tables_and_live_set() {
        let mut graph = Graph::new(3);
        let a = graph.add_node(0, 1);
        let b = graph.add_node(1, 1);
        graph.link(a, Side::Right, b, true);

        graph.node(a).remove_extension(b);
        graph.remove_nodes([b]);

        assert_eq!(graph.live_node_count(), 1);
        assert_eq!(graph.live_nodes().collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.node(b).extension_counts(), (0, 0));
    }
}
