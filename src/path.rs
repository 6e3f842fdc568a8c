//! Walk value types: an ordered run of graph nodes forming one dangling link,
//! and the collection of such runs handed to the removal step.

use crate::graph::NodeIx;

/// Ordered walk of node indices, tip first, branch-attached node last.
///
/// A path is owned by the trace that builds it and moved to the orchestrator
/// on completion. Appending a node already present signals a loop and is the
/// tracer's responsibility to detect before pushing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath {
    nodes: Vec<NodeIx>,
}

impl NodePath {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn from_node(node: NodeIx) -> Self {
        Self { nodes: vec![node] }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeIx) -> bool {
        self.nodes.contains(&node)
    }

    pub fn push(&mut self, node: NodeIx) {
        self.nodes.push(node);
    }

    /// The branch-attached end of the walk, if any.
    pub fn last(&self) -> Option<NodeIx> {
        self.nodes.last().copied()
    }

    pub fn nodes(&self) -> &[NodeIx] {
        &self.nodes
    }

    /// Drop the first occurrence of `node`; used when resuming a deferred
    /// trace whose captured branch node must be re-evaluated.
    pub fn remove(&mut self, node: NodeIx) {
        if let Some(pos) = self.nodes.iter().position(|&n| n == node) {
            self.nodes.remove(pos);
        }
    }
}

/// Order-insensitive collection of completed dangling-link paths.
#[derive(Debug, Clone, Default)]
pub struct PathList {
    paths: Vec<NodePath>,
}

impl PathList {
    pub fn new() -> Self {
        Self { paths: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn push(&mut self, path: NodePath) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[NodePath] {
        &self.paths
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodePath> {
        self.paths.iter()
    }

    /// Total number of nodes across all paths.
    pub fn node_count(&self) -> usize {
        self.paths.iter().map(NodePath::len).sum()
    }
}

impl From<Vec<NodePath>> for PathList {
    fn from(paths: Vec<NodePath>) -> Self {
        Self { paths }
    }
}

impl<'a> IntoIterator for &'a PathList {
    type Item = &'a NodePath;
    type IntoIter = std::slice::Iter<'a, NodePath>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}
