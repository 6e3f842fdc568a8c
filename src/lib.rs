//! debruijn_prune library
//!
//! Core primitives for cleaning a de Bruijn assembly graph before contig
//! extension: the node/graph substrate, dangling-link detection and removal,
//! and iterative erosion of low-coverage graph ends. Graph construction from
//! reads is included so the purger can be exercised end to end; contig
//! building itself is a downstream concern.

pub mod build;
pub mod graph;
pub mod path;
pub mod purge;
mod trace;

pub use build::{BuildError, GraphBuilder};
pub use graph::{
    canonical_kmer, pack_kmer, revcomp_kmer, unpack_kmer, Extension, Graph, Node, NodeIx, Side,
};
pub use path::{NodePath, PathList};
pub use purge::DanglingLinkPurger;
