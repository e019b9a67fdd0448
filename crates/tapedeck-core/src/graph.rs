//! Route feed graph and process ordering.
//!
//! The graph is rebuilt on non-RT threads whenever routes, connections or
//! rec-enables change; the audio thread only ever loads the published
//! flat ordering.

use crate::types::RouteId;
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Edges of the route feed graph, kept in both directions so that
/// in-degree checks are O(log n) lookups.
#[derive(Debug, Clone, Default)]
pub struct DagEdges {
    from_to: BTreeMap<RouteId, BTreeSet<RouteId>>,
    to_from: BTreeMap<RouteId, BTreeSet<RouteId>>,
}

impl DagEdges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, from: RouteId, to: RouteId) {
        self.from_to.entry(from).or_default().insert(to);
        self.to_from.entry(to).or_default().insert(from);
    }

    pub fn remove(&mut self, from: RouteId, to: RouteId) {
        if let Some(set) = self.from_to.get_mut(&from) {
            set.remove(&to);
            if set.is_empty() {
                self.from_to.remove(&from);
            }
        }
        if let Some(set) = self.to_from.get_mut(&to) {
            set.remove(&from);
            if set.is_empty() {
                self.to_from.remove(&to);
            }
        }
    }

    /// Routes fed by `r`.
    pub fn from(&self, r: RouteId) -> Vec<RouteId> {
        self.from_to
            .get(&r)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True if nothing feeds `to`.
    pub fn has_none_to(&self, to: RouteId) -> bool {
        !self.to_from.contains_key(&to)
    }

    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.from_to.is_empty(), self.to_from.is_empty());
        self.from_to.is_empty()
    }
}

/// Per-route ordering inputs for the sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub rec_enabled: bool,
    /// Stable tiebreak, usually the route's signal-chain position.
    pub order_key: u32,
}

/// Outcome of a sort pass.
#[derive(Debug, Clone)]
pub struct SortResult {
    pub order: Vec<RouteId>,
    pub feedback: bool,
}

/// Kahn's algorithm over the feed graph.
///
/// The initial queue (routes fed by nothing) is ordered so that
/// non-rec-enabled routes run before rec-enabled ones; a rec-enabled
/// route can then record material produced by other routes in the same
/// cycle. Remaining edges after the queue drains mean a feedback cycle:
/// the routes involved are appended in key order so every route still
/// runs.
pub fn topological_sort(routes: &[(RouteId, SortKey)], edges: &DagEdges) -> SortResult {
    let mut edges = edges.clone();
    let mut sorted: Vec<RouteId> = Vec::with_capacity(routes.len());

    let mut queue: Vec<RouteId> = routes
        .iter()
        .filter(|(id, _)| edges.has_none_to(*id))
        .map(|(id, _)| *id)
        .collect();

    let key_of = |id: RouteId| -> SortKey {
        routes
            .iter()
            .find(|(r, _)| *r == id)
            .map(|(_, k)| *k)
            .unwrap_or(SortKey {
                rec_enabled: false,
                order_key: u32::MAX,
            })
    };

    queue.sort_by_key(|&id| {
        let k = key_of(id);
        (k.rec_enabled, k.order_key)
    });

    let mut head = 0;
    while head < queue.len() {
        let r = queue[head];
        head += 1;
        sorted.push(r);
        for to in edges.from(r) {
            edges.remove(r, to);
            if edges.has_none_to(to) {
                queue.push(to);
            }
        }
    }

    let feedback = !edges.is_empty();
    if feedback {
        warn!("feedback detected in route graph, using best-effort order");
        let mut remaining: Vec<RouteId> = routes
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !sorted.contains(id))
            .collect();
        remaining.sort_by_key(|&id| {
            let k = key_of(id);
            (k.rec_enabled, k.order_key)
        });
        sorted.extend(remaining);
    }

    SortResult {
        order: sorted,
        feedback,
    }
}

/// The process order as seen by the audio thread.
///
/// Non-RT graph rebuilds store a fresh vector; the audio thread loads a
/// consistent snapshot with a single atomic pointer read.
pub struct ProcessOrder {
    current: ArcSwap<Vec<RouteId>>,
}

impl ProcessOrder {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn publish(&self, order: Vec<RouteId>) {
        self.current.store(Arc::new(order));
    }

    pub fn load(&self) -> Arc<Vec<RouteId>> {
        self.current.load_full()
    }
}

impl Default for ProcessOrder {
    fn default() -> Self {
        Self::new()
    }
}
