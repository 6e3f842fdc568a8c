//! Graph construction: k-mer extraction from reads into the node arena.
//!
//! Node identity is the canonical (strand-independent) form of each k-mer;
//! consecutive k-mers within a read yield reciprocal left/right extensions
//! whose orientation flag records whether the two canonical forms were read
//! on the same strand.

use std::collections::HashMap;

use log::{debug, info};

use crate::graph::{canonical_kmer, pack_kmer, Graph, NodeIx, Side};

/// Errors from graph construction configuration.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("k-mer length must be at least 1")]
    KmerLengthZero,
    #[error("k-mer length {0} exceeds the 32-base packing limit")]
    KmerLengthTooLarge(usize),
}

/// Builds a [`Graph`] from a read set for a fixed k-mer length.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    k: usize,
}

impl GraphBuilder {
    pub fn new(k: usize) -> Result<Self, BuildError> {
        if k == 0 {
            return Err(BuildError::KmerLengthZero);
        }
        if k > 32 {
            return Err(BuildError::KmerLengthTooLarge(k));
        }
        Ok(Self { k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Two passes over the reads: count canonical k-mers and assign arena
    /// indices, then wire up oriented extensions between adjacent windows.
    /// Windows containing non-ACGT symbols are skipped, as are reads shorter
    /// than k.
    pub fn build(&self, reads: &[String]) -> Graph {
        let k = self.k;
        let mut index: HashMap<u64, NodeIx> = HashMap::new();
        let mut counts: Vec<u32> = Vec::new();

        let mut short_reads = 0usize;
        for read in reads {
            if read.len() < k {
                short_reads += 1;
                continue;
            }
            for packed in read_windows(read.as_bytes(), k).into_iter().flatten() {
                let (canonical, _) = canonical_kmer(packed, k);
                let next_ix = counts.len();
                let ix = *index.entry(canonical).or_insert(next_ix);
                if ix == next_ix {
                    counts.push(1);
                } else {
                    counts[ix] += 1;
                }
            }
        }
        if short_reads > 0 {
            debug!("skipped {} reads shorter than k={}", short_reads, k);
        }

        let mut graph = Graph::new(k);
        let mut ordered: Vec<(u64, NodeIx)> = index.iter().map(|(&kmer, &ix)| (kmer, ix)).collect();
        ordered.sort_unstable_by_key(|&(_, ix)| ix);
        for (kmer, ix) in ordered {
            let added = graph.add_node(kmer, counts[ix]);
            debug_assert_eq!(added, ix);
        }

        for read in reads {
            if read.len() < k {
                continue;
            }
            let windows = read_windows(read.as_bytes(), k);
            for pair in windows.windows(2) {
                let (Some(x), Some(y)) = (pair[0], pair[1]) else {
                    continue;
                };
                let (cx, dx) = canonical_kmer(x, k);
                let (cy, dy) = canonical_kmer(y, k);
                let side = if dx { Side::Right } else { Side::Left };
                graph.link(index[&cx], side, index[&cy], dx == dy);
            }
        }

        info!(
            "built graph: {} nodes from {} reads (k={})",
            graph.len(),
            reads.len(),
            k
        );
        graph
    }
}

/// Packed k-length windows at every position of `seq`; `None` where the
/// window contains a non-ACGT symbol.
fn read_windows(seq: &[u8], k: usize) -> Vec<Option<u64>> {
    seq.windows(k).map(pack_kmer).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::unpack_kmer;

    #[test]
    fn rejects_bad_k() {
        assert!(matches!(GraphBuilder::new(0), Err(BuildError::KmerLengthZero)));
        assert!(matches!(
            GraphBuilder::new(33),
            Err(BuildError::KmerLengthTooLarge(33))
        ));
    }

    #[test]
    fn builds_linear_chain() {
        let builder = GraphBuilder::new(4).unwrap();
        let graph = builder.build(&["AACCTTGG".to_string()]);

        // Five 4-mers, all distinct after canonicalisation.
        assert_eq!(graph.len(), 5);
        let interior = graph
            .live_nodes()
            .filter(|&ix| {
                let (l, r) = graph.node(ix).extension_counts();
                l == 1 && r == 1
            })
            .count();
        let tips = graph
            .live_nodes()
            .filter(|&ix| {
                let (l, r) = graph.node(ix).extension_counts();
                l + r == 1
            })
            .count();
        assert_eq!(interior, 3);
        assert_eq!(tips, 2);
    }

    #[test]
    fn merges_reverse_complement_reads() {
        let builder = GraphBuilder::new(3).unwrap();
        // CGT is the reverse complement of ACG; both land on one node.
        let graph = builder.build(&["ACG".to_string(), "CGT".to_string()]);
        assert_eq!(graph.len(), 1);
        let node = graph.node(0);
        assert_eq!(node.kmer_count(), 2);
        assert_eq!(unpack_kmer(node.kmer(), 3), "ACG");
    }

    #[test]
    fn adjacent_windows_share_an_oriented_edge() {
        let builder = GraphBuilder::new(3).unwrap();
        let graph = builder.build(&["ACGT".to_string()]);

        // ACG and CGT are reverse complements of each other, so the read
        // collapses onto a single node with a strand-flipping self edge.
        assert_eq!(graph.len(), 1);
        let node = graph.node(0);
        assert_eq!(node.kmer_count(), 2);
        let (left, right) = node.extension_counts();
        assert_eq!(left + right, 1);
        assert!(!node.all_extensions()[0].same_orientation);
    }

    #[test]
    fn skips_windows_with_unknown_bases() {
        let builder = GraphBuilder::new(3).unwrap();
        let graph = builder.build(&["ACNGT".to_string()]);
        // Only ACN, CNG, NGT windows exist and all contain N.
        assert_eq!(graph.len(), 0);
    }
}
