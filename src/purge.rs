//! The purger orchestrator: drives erosion rounds over graph tips, collects
//! dangling-link statistics, and detects and removes erroneous tip branches.
//!
//! Dangling links are caused by errors at the ends of reads; graph ends with
//! abnormally low coverage are eroded before dangling-link purging so that
//! error branches do not survive behind low-coverage tips.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info};
use rayon::prelude::*;

use crate::graph::{Graph, NodeIx};
use crate::path::{NodePath, PathList};
use crate::trace::{resume_deferred, DeferredTrace, LinkTracer};

/// Detects dangling links, erodes low-coverage graph ends, and purges the
/// resulting erroneous nodes.
///
/// `length_threshold` is the maximum dangling-link length considered
/// erroneous; zero means unbounded, for callers that pick a threshold after
/// an erosion statistics pass. `erode_threshold` is the minimum coverage a
/// tip node needs to survive erosion; `None` disables erosion, degrading
/// [`erode_graph_ends`](Self::erode_graph_ends) to pure statistics
/// collection.
#[derive(Debug)]
pub struct DanglingLinkPurger {
    length_threshold: usize,
    erode_threshold: Option<u32>,
}

impl DanglingLinkPurger {
    pub fn new(length_threshold: usize, erode_threshold: Option<u32>) -> Self {
        Self {
            length_threshold,
            erode_threshold,
        }
    }

    pub fn length_threshold(&self) -> usize {
        self.length_threshold
    }

    pub fn set_length_threshold(&mut self, length_threshold: usize) {
        self.length_threshold = length_threshold;
    }

    /// Erode graph ends whose coverage falls below the configured erosion
    /// threshold, iterating until a round commits nothing, and report the
    /// distinct dangling-link lengths observed along the way.
    ///
    /// The length set is the input for choosing a purge threshold; no nodes
    /// are removed beyond the erosion commits themselves. Walks that stall on
    /// ambiguity mid-erosion are parked and resumed once after the fixed
    /// point, when the competing branch may be gone.
    pub fn erode_graph_ends(&self, graph: &Graph) -> BTreeSet<usize> {
        let deferred: Mutex<Vec<DeferredTrace>> = Mutex::new(Vec::new());
        let mut lengths = BTreeSet::new();

        info!(
            "eroding graph ends over {} nodes (coverage threshold {:?})",
            graph.live_node_count(),
            self.erode_threshold
        );

        let mut candidates: Vec<NodeIx> = graph.live_nodes().collect();
        let mut round = 0usize;
        loop {
            round += 1;
            let tracer = LinkTracer::eroding(
                graph,
                self.erode_threshold,
                self.length_threshold,
                &deferred,
            );

            // Fan out over the round's tip candidates; per-worker results are
            // merged after the join rather than streamed through a channel.
            let round_lengths: Vec<usize> = candidates
                .par_iter()
                .filter_map(|&ix| classify_for_length(&tracer, graph, ix))
                .collect();
            lengths.extend(round_lengths);

            candidates = commit_erosion(graph);
            debug!(
                "erosion round {}: {} newly exposed tip candidates",
                round,
                candidates.len()
            );
            if candidates.is_empty() {
                break;
            }
        }

        let parked = deferred
            .into_inner()
            .expect("deferred task lock poisoned");
        if !parked.is_empty() {
            debug!("resuming {} deferred dangling-link walks", parked.len());
            let length_threshold = self.length_threshold;
            let resumed: Vec<usize> = parked
                .into_par_iter()
                .map(|task| resume_deferred(graph, length_threshold, task))
                .filter(|&len| len > 0)
                .collect();
            lengths.extend(resumed);
        }

        info!(
            "erosion finished after {} rounds; {} live nodes remain, link lengths {:?}",
            round,
            graph.live_node_count(),
            lengths
        );
        lengths
    }

    /// Detect nodes on dangling links in a single concurrent sweep, with no
    /// erosion. Pure read pass over the topology.
    pub fn detect_erroneous_nodes(&self, graph: &Graph) -> PathList {
        let tracer = LinkTracer::detecting(graph, self.length_threshold);
        let live: Vec<NodeIx> = graph.live_nodes().collect();

        let paths: Vec<NodePath> = live
            .par_iter()
            .filter_map(|&ix| classify_for_path(&tracer, graph, ix))
            .collect();

        debug!(
            "detected {} dangling links ({} nodes) at length threshold {}",
            paths.len(),
            paths.iter().map(NodePath::len).sum::<usize>(),
            self.length_threshold
        );
        PathList::from(paths)
    }

    /// Remove every node on the given dangling links and repair the
    /// adjacency of the surviving graph.
    ///
    /// Only the last node of a link can have extensions into the valid
    /// graph, so repair strips the back-edges from those neighbours first
    /// (per-node write locks; two links may share a neighbour) and the nodes
    /// are bulk-removed afterwards. This ordering never leaves a surviving
    /// node referencing a removed one.
    pub fn remove_erroneous_nodes(&self, graph: &Graph, paths: &PathList) {
        let last_nodes: HashSet<NodeIx> = paths.iter().filter_map(NodePath::last).collect();

        let removed: Vec<NodeIx> = paths
            .paths()
            .par_iter()
            .flat_map_iter(|path| {
                detach_link(graph, path, &last_nodes);
                path.nodes().iter().copied()
            })
            .collect();

        info!("removing {} erroneous nodes", removed.len());
        graph.remove_nodes(removed);
    }
}

impl Default for DanglingLinkPurger {
    fn default() -> Self {
        Self::new(0, None)
    }
}

/// Classify one tip candidate for the erosion statistics sweep. Returns the
/// observed dangling-link length, if any. Isolated nodes are islands of
/// length one; the low-coverage ones are additionally marked for erosion, as
/// is the low-coverage prefix of any traced walk.
fn classify_for_length(tracer: &LinkTracer<'_>, graph: &Graph, ix: NodeIx) -> Option<usize> {
    let node = graph.node(ix);
    if node.is_deleted() {
        return None;
    }

    let (left, right) = node.extension_counts();
    if left + right == 0 {
        if let Some(threshold) = tracer.erode_threshold() {
            if node.kmer_count() < threshold {
                node.mark_for_delete();
            }
        }
        return Some(1);
    }

    let outcome = if right == 0 {
        tracer.trace(false, NodePath::new(), ix, true)
    } else if left == 0 {
        tracer.trace(true, NodePath::new(), ix, true)
    } else {
        return None;
    };

    match outcome.path {
        Some(path) if !path.is_empty() => Some(path.len()),
        // An empty or discarded walk still measured the eroded chain it
        // marked on the way in.
        _ if outcome.eroded > 0 => Some(outcome.eroded),
        _ => None,
    }
}

/// Classify one tip candidate for the detection sweep.
fn classify_for_path(tracer: &LinkTracer<'_>, graph: &Graph, ix: NodeIx) -> Option<NodePath> {
    let node = graph.node(ix);
    if node.is_deleted() {
        return None;
    }

    let (left, right) = node.extension_counts();
    if left + right == 0 {
        // Single-node island.
        return Some(NodePath::from_node(ix));
    }
    let outcome = if right == 0 {
        tracer.trace(false, NodePath::new(), ix, true)
    } else if left == 0 {
        tracer.trace(true, NodePath::new(), ix, true)
    } else {
        return None;
    };
    outcome.path.filter(|path| !path.is_empty())
}

/// Promote this round's soft delete marks to committed deletions and report
/// the tip candidates for the next round: every live node that either was an
/// endpoint already or became one when its edges to eroded neighbours were
/// dropped. Empty when the round eroded nothing.
fn commit_erosion(graph: &Graph) -> Vec<NodeIx> {
    let live: Vec<NodeIx> = graph.live_nodes().collect();

    let eroded = AtomicUsize::new(0);
    live.par_iter().for_each(|&ix| {
        let node = graph.node(ix);
        if node.is_marked_for_delete() {
            node.commit_delete();
            eroded.fetch_add(1, Ordering::Relaxed);
        }
    });

    let eroded = eroded.into_inner();
    if eroded == 0 {
        return Vec::new();
    }
    debug!("committed {} eroded nodes", eroded);

    live.par_iter()
        .filter(|&&ix| !graph.node(ix).is_deleted())
        .filter_map(|&ix| {
            let node = graph.node(ix);
            let (left, right) = node.extension_counts();
            let was_endpoint = left == 0 || right == 0;
            graph.drop_marked_extensions(ix);
            let (left, right) = node.extension_counts();
            (was_endpoint || left == 0 || right == 0).then_some(ix)
        })
        .collect()
}

/// Strip the surviving neighbours' back-edges into one dangling link. Other
/// link-terminal nodes are skipped; they are being removed themselves and
/// skipping them keeps write-lock contention down.
fn detach_link(graph: &Graph, path: &NodePath, last_nodes: &HashSet<NodeIx>) {
    let Some(last) = path.last() else {
        return;
    };
    for ext in graph.node(last).all_extensions() {
        if !last_nodes.contains(&ext.to) {
            graph.node(ext.to).remove_extension(last);
        }
    }
}
