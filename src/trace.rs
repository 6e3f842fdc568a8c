//! The link tracer: starting from a degree-anomalous node, walk back along
//! single-successor chains and decide whether the chain is a genuine short
//! dangling branch.
//!
//! All classification outcomes (loop, over-length, ambiguity) are encoded in
//! the return value; they occur routinely on real graphs and are never
//! errors. Tracing only reads topology, so no locks are held across steps.

use std::sync::Mutex;

use log::trace as trace_log;

use crate::graph::{Graph, NodeIx, Side};
use crate::path::NodePath;

/// A walk that stalled on a back-side branch point while erosion was active.
/// Captured as a plain record and re-run once after the erosion fixed point,
/// when the competing branch may have been eroded away.
#[derive(Debug)]
pub(crate) struct DeferredTrace {
    pub forward: bool,
    pub path: NodePath,
    pub node: NodeIx,
    pub same_orientation: bool,
    /// Strip the captured node from the path before retrying; set when the
    /// node was appended at a same-direction branch point whose ambiguity may
    /// since have resolved.
    pub remove_last: bool,
}

/// Result of one full walk attempt, together with the number of nodes the
/// walk freshly marked for erosion.
pub(crate) struct TraceOutcome {
    pub path: Option<NodePath>,
    pub eroded: usize,
}

/// Outcome of the single chokepoint that guards every path append.
enum Checked {
    /// Node appended; walk may continue.
    Added,
    /// Low-coverage tip node freshly marked for erosion; not appended, walk
    /// continues so the whole low-coverage prefix is marked in one round.
    Marked,
    /// Node already in the path, or already marked while below the erosion
    /// threshold: the walk closed a loop. Stop, keep the path as built.
    LoopFound,
    /// Path reached the length threshold: not a short dangling link. Stop and
    /// discard.
    TooLong,
}

/// One tracer per sweep; cheap to construct, shared immutably across the
/// sweep's workers.
pub(crate) struct LinkTracer<'a> {
    graph: &'a Graph,
    erode_threshold: Option<u32>,
    length_threshold: usize,
    deferred: Option<&'a Mutex<Vec<DeferredTrace>>>,
}

impl<'a> LinkTracer<'a> {
    /// Tracer for an erosion sweep: marks low-coverage tips and defers walks
    /// stalled on ambiguity.
    pub fn eroding(
        graph: &'a Graph,
        erode_threshold: Option<u32>,
        length_threshold: usize,
        deferred: &'a Mutex<Vec<DeferredTrace>>,
    ) -> Self {
        Self {
            graph,
            erode_threshold,
            length_threshold,
            deferred: Some(deferred),
        }
    }

    /// Tracer for a pure detection pass (and for deferred resumption): no
    /// marking, ambiguity returns immediately, nothing is deferred.
    pub fn detecting(graph: &'a Graph, length_threshold: usize) -> Self {
        Self {
            graph,
            erode_threshold: None,
            length_threshold,
            deferred: None,
        }
    }

    pub fn erode_threshold(&self) -> Option<u32> {
        self.erode_threshold
    }

    /// Walk backward from a potential dangling-link end.
    ///
    /// `forward` is the direction the link extends; the side continuing the
    /// walk at each node is left when `forward XOR same_orientation`, right
    /// otherwise. A `None` path means the walk was discarded (over-length) or
    /// deferred; the `eroded` count is meaningful either way.
    pub fn trace(
        &self,
        forward: bool,
        mut path: NodePath,
        mut node: NodeIx,
        mut same_orientation: bool,
    ) -> TraceOutcome {
        let mut eroded = 0usize;
        loop {
            let same_side = if forward ^ same_orientation {
                Side::Left
            } else {
                Side::Right
            };
            let current = self.graph.node(node);
            let (same_exts, opposite_count) = current.directed_extensions(same_side);

            if same_exts.is_empty() {
                // Genuine other end of the branch.
                let path = match self.check_and_add(&mut path, node, &mut eroded) {
                    Checked::TooLong => None,
                    _ => Some(path),
                };
                return TraceOutcome { path, eroded };
            }

            if opposite_count > 1 {
                // Branch point reached from behind: the current node belongs
                // to the main graph. Mid-erosion the verdict depends on
                // whether the competing branch erodes, so park the walk.
                if self.should_defer(node) {
                    self.defer(DeferredTrace {
                        forward,
                        path,
                        node,
                        same_orientation,
                        remove_last: false,
                    });
                    return TraceOutcome { path: None, eroded };
                }
                return TraceOutcome { path: Some(path), eroded };
            }

            if same_exts.len() > 1 {
                // The node itself is a branch point; it is appended first so
                // a resolved resume can strip and re-check it.
                let path = match self.check_and_add(&mut path, node, &mut eroded) {
                    Checked::TooLong => None,
                    Checked::LoopFound => Some(path),
                    Checked::Added | Checked::Marked => {
                        if self.should_defer(node) {
                            self.defer(DeferredTrace {
                                forward,
                                path,
                                node,
                                same_orientation,
                                remove_last: true,
                            });
                            return TraceOutcome { path: None, eroded };
                        }
                        Some(path)
                    }
                };
                return TraceOutcome { path, eroded };
            }

            // Exactly one extension each way: unambiguous continuation.
            match self.check_and_add(&mut path, node, &mut eroded) {
                Checked::TooLong => return TraceOutcome { path: None, eroded },
                Checked::LoopFound => {
                    return TraceOutcome {
                        path: Some(path),
                        eroded,
                    }
                }
                Checked::Added | Checked::Marked => {
                    let next = same_exts[0];
                    trace_log!(
                        "walk {} -> {} (orientation {})",
                        node,
                        next.to,
                        next.same_orientation
                    );
                    node = next.to;
                    same_orientation = !(same_orientation ^ next.same_orientation);
                }
            }
        }
    }

    /// The single chokepoint enforcing loop, length and erosion semantics for
    /// every prospective path node.
    fn check_and_add(&self, path: &mut NodePath, node: NodeIx, eroded: &mut usize) -> Checked {
        let current = self.graph.node(node);

        if let Some(threshold) = self.erode_threshold {
            if path.is_empty() && current.kmer_count() < threshold {
                return if current.mark_for_delete() {
                    *eroded += 1;
                    Checked::Marked
                } else {
                    // Another walk already marked it: this walk came back
                    // around to its own erosion front.
                    Checked::LoopFound
                };
            }
        }

        if path.contains(node) {
            return Checked::LoopFound;
        }

        if self.length_threshold > 0 && path.len() >= self.length_threshold {
            return Checked::TooLong;
        }

        path.push(node);
        Checked::Added
    }

    fn should_defer(&self, node: NodeIx) -> bool {
        self.erode_threshold.is_some()
            && self.deferred.is_some()
            && !self.graph.node(node).is_marked_for_delete()
    }

    fn defer(&self, task: DeferredTrace) {
        if let Some(deferred) = self.deferred {
            deferred
                .lock()
                .expect("deferred task lock poisoned")
                .push(task);
        }
    }
}

/// Resume one deferred walk after the erosion fixed point. Runs with erosion
/// disabled, which both prevents stray late marks and rules out a second
/// deferral. Returns the length of the dangling link found, zero if none.
pub(crate) fn resume_deferred(graph: &Graph, length_threshold: usize, task: DeferredTrace) -> usize {
    let tracer = LinkTracer::detecting(graph, length_threshold);

    let DeferredTrace {
        forward,
        mut path,
        node,
        same_orientation,
        remove_last,
    } = task;

    if graph.node(node).is_deleted() {
        // The branch point itself was eroded away after the walk parked.
        return 0;
    }

    if remove_last {
        path.remove(node);
    }

    let outcome = if path.is_empty() {
        // Nothing committed yet: only worth resuming if erosion exposed the
        // captured node as a genuine tip.
        let (left, right) = graph.node(node).extension_counts();
        if right == 0 {
            tracer.trace(false, NodePath::new(), node, true)
        } else if left == 0 {
            tracer.trace(true, NodePath::new(), node, true)
        } else {
            return 0;
        }
    } else {
        tracer.trace(forward, path, node, same_orientation)
    };

    outcome.path.map(|p| p.len()).unwrap_or(0)
}
