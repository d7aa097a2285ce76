//! ## Vantage-point tree
//!
//! A VP-tree indexes a fixed collection of items under a [`Metric`] and answers
//! ε-radius range queries in sub-linear expected time, with defensive
//! construction against degenerate metrics (low-cardinality distance
//! distributions, heavy ties). The tree is immutable after construction; see
//! the crate-level docs for the acceptance/shuffle/leaf-fallback algorithm.
//!
//! Internally the tree is an arena of [`VpNode`] records addressed by index
//! rather than a box-owned recursive structure, avoiding cyclic ownership and
//! keeping storage contiguous. Construction is single-pass, building the arena
//! bottom-up.

use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::errors::MetricDbscanError;
use crate::metric::Metric;

/// Construction parameters for a [`VpTree`].
///
/// Defaults mirror the reference implementation's constructor keyword
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VpTreeParams {
    /// A node with fewer items than this is stored as a leaf. Must be `>= 3`.
    pub max_items_per_node: usize,
    /// Maximum depth before a subtree is forced into a leaf regardless of size.
    pub max_depth: usize,
    /// Minimum fraction of a node's items each side of a split must retain for
    /// the split to be accepted.
    pub min_split_fraction: f64,
    /// How many times construction will reshuffle and retry a split before
    /// giving up and storing an oversized leaf.
    pub max_shuffle_attempts: usize,
}

impl Default for VpTreeParams {
    fn default() -> Self {
        VpTreeParams {
            max_items_per_node: 10,
            max_depth: 20,
            min_split_fraction: 0.01,
            max_shuffle_attempts: 5,
        }
    }
}

impl VpTreeParams {
    fn validate(&self) -> Result<(), MetricDbscanError> {
        if self.max_items_per_node < 3 {
            return Err(MetricDbscanError::invalid_parameter(format!(
                "max_items_per_node must be at least 3, got {}",
                self.max_items_per_node
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeId(usize);

#[derive(Debug)]
enum VpNode<T> {
    Leaf {
        items: Vec<T>,
        depth: usize,
    },
    Inner {
        anchor: T,
        threshold: f64,
        near: NodeId,
        far: NodeId,
        depth: usize,
    },
}

impl<T> VpNode<T> {
    fn depth(&self) -> usize {
        match self {
            VpNode::Leaf { depth, .. } => *depth,
            VpNode::Inner { depth, .. } => *depth,
        }
    }
}

/// A vantage-point tree over items of type `T`, built once and queried many
/// times. See the module docs for the construction and query algorithms.
#[derive(Debug)]
pub struct VpTree<T, M: Metric<T>> {
    metric: M,
    arena: Vec<VpNode<T>>,
    root: Option<NodeId>,
    size: usize,
    populated: bool,
}

impl<T, M: Metric<T>> VpTree<T, M> {
    /// Creates an empty, unpopulated tree over `metric`. Call [`insert`](Self::insert)
    /// (or one of the `build*` constructors) to populate it.
    pub fn new(metric: M) -> Self {
        VpTree {
            metric,
            arena: Vec::new(),
            root: None,
            size: 0,
            populated: false,
        }
    }

    /// Builds a tree over `items` in one step, using a non-deterministic
    /// random source for the shuffle step of construction.
    pub fn build(metric: M, items: Vec<T>, params: &VpTreeParams) -> Result<Self, MetricDbscanError> {
        let mut tree = Self::new(metric);
        let mut rng = rand::rng();
        tree.insert_with_rng(items, params, &mut rng)?;
        Ok(tree)
    }

    /// Builds a tree over `items` in one step, seeding the shuffle step's
    /// random source deterministically. Intended for tests and reproducible
    /// runs; see the crate-level docs on shuffle determinism.
    pub fn build_seeded(
        metric: M,
        items: Vec<T>,
        params: &VpTreeParams,
        seed: u64,
    ) -> Result<Self, MetricDbscanError> {
        let mut tree = Self::new(metric);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        tree.insert_with_rng(items, params, &mut rng)?;
        Ok(tree)
    }

    /// Adds `items` to this tree. Fails with [`MetricDbscanError::AlreadyPopulated`]
    /// if the tree has already been built.
    pub fn insert(&mut self, items: Vec<T>, params: &VpTreeParams) -> Result<(), MetricDbscanError> {
        let mut rng = rand::rng();
        self.insert_with_rng(items, params, &mut rng)
    }

    /// Like [`insert`](Self::insert), seeding the shuffle step deterministically.
    pub fn insert_seeded(
        &mut self,
        items: Vec<T>,
        params: &VpTreeParams,
        seed: u64,
    ) -> Result<(), MetricDbscanError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.insert_with_rng(items, params, &mut rng)
    }

    fn insert_with_rng<R: RngCore>(
        &mut self,
        items: Vec<T>,
        params: &VpTreeParams,
        rng: &mut R,
    ) -> Result<(), MetricDbscanError> {
        params.validate()?;
        if self.populated {
            return Err(MetricDbscanError::AlreadyPopulated);
        }
        let size = items.len();
        let root = build_node(&self.metric, items, 0, params, rng, &mut self.arena);
        self.root = Some(root);
        self.size = size;
        self.populated = true;
        Ok(())
    }

    /// Resets the tree to an empty, unpopulated state.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.size = 0;
        self.populated = false;
    }

    /// Total number of indexed items.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of indexed items. Equivalent to [`size`](Self::size);
    /// kept as a separate method mirroring the reference implementation's
    /// `__len__`.
    pub fn len(&self) -> usize {
        self.size
    }

    /// `true` iff the tree holds no items.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The depth of the root node, 0 for any non-empty tree (construction
    /// invariant: the root is always built at depth 0). Returns 0 for an
    /// empty tree too. Crate-internal: used by construction-invariant tests,
    /// not a public product feature.
    pub(crate) fn depth_of_root(&self) -> usize {
        self.root.map_or(0, |root| self.arena[root.0].depth())
    }

    /// Returns every indexed item whose distance to `center` is `< radius`
    /// (or `<= radius` when `include_boundary` is `true`). `center` need not
    /// be one of the indexed items. Result ordering is unspecified.
    pub fn range_query(&self, center: &T, radius: f64, include_boundary: bool) -> Vec<&T> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.range_query_node(root, center, radius, include_boundary, &mut out);
        }
        out
    }

    fn range_query_node(
        &self,
        node: NodeId,
        center: &T,
        radius: f64,
        include_boundary: bool,
        out: &mut Vec<&T>,
    ) {
        match &self.arena[node.0] {
            VpNode::Leaf { items, .. } => {
                for item in items {
                    let d = self.metric.distance(center, item);
                    if d < radius || (include_boundary && d == radius) {
                        out.push(item);
                    }
                }
            }
            VpNode::Inner {
                anchor,
                threshold,
                near,
                far,
                ..
            } => {
                let delta = self.metric.distance(center, anchor);
                if delta < radius || (include_boundary && delta == radius) {
                    out.push(anchor);
                }
                if delta <= threshold + radius {
                    self.range_query_node(*near, center, radius, include_boundary, out);
                }
                if delta + radius >= *threshold {
                    self.range_query_node(*far, center, radius, include_boundary, out);
                }
            }
        }
    }
}

/// k-NN is supported internally (DBSCAN only ever issues radius queries
/// through [`VpTree::range_query`]); it is not a primary product feature of
/// this crate, but is exposed for callers and tests that need exact
/// nearest-neighbor search over the same index.
impl<T: PartialEq, M: Metric<T>> VpTree<T, M> {
    /// Returns up to `k` items nearest to `center`, sorted by ascending
    /// distance, excluding any item equal to `center` by [`PartialEq`].
    pub fn knn_search(&self, center: &T, k: usize) -> Vec<&T> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<HeapItem<'_, T>> = BinaryHeap::new();
        if let Some(root) = self.root {
            self.knn_node(root, center, k, &mut heap);
        }
        let mut found: Vec<(f64, &T)> = heap
            .into_iter()
            .map(|entry| (entry.dist.into_inner(), entry.item))
            .collect();
        found.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("distances must be comparable"));
        found.into_iter().map(|(_, item)| item).collect()
    }

    fn knn_node(&self, node: NodeId, center: &T, k: usize, heap: &mut BinaryHeap<HeapItem<'_, T>>) {
        match &self.arena[node.0] {
            VpNode::Leaf { items, .. } => {
                for item in items {
                    if item == center {
                        continue;
                    }
                    let d = self.metric.distance(center, item);
                    push_bounded(heap, d, item, k);
                }
            }
            VpNode::Inner {
                anchor,
                threshold,
                near,
                far,
                ..
            } => {
                let delta = self.metric.distance(center, anchor);
                if anchor != center {
                    push_bounded(heap, delta, anchor, k);
                }
                let farthest_before = farthest_kept(heap, k);
                if delta <= threshold + farthest_before {
                    self.knn_node(*near, center, k, heap);
                }
                let farthest_after = farthest_kept(heap, k);
                if heap.len() < k || delta + farthest_after >= *threshold {
                    self.knn_node(*far, center, k, heap);
                }
            }
        }
    }
}

struct HeapItem<'a, T> {
    dist: OrderedFloat<f64>,
    item: &'a T,
}

impl<'a, T> PartialEq for HeapItem<'a, T> {
    fn eq(&self, other: &Self) -> bool {
        self.dist.eq(&other.dist)
    }
}

impl<'a, T> Eq for HeapItem<'a, T> {}

impl<'a, T> PartialOrd for HeapItem<'a, T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, T> Ord for HeapItem<'a, T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.cmp(&other.dist)
    }
}

fn farthest_kept<T>(heap: &BinaryHeap<HeapItem<'_, T>>, k: usize) -> f64 {
    if heap.len() < k {
        f64::INFINITY
    } else {
        heap.peek().map(|top| top.dist.into_inner()).unwrap_or(f64::INFINITY)
    }
}

fn push_bounded<'a, T>(heap: &mut BinaryHeap<HeapItem<'a, T>>, dist: f64, item: &'a T, k: usize) {
    if heap.len() < k {
        heap.push(HeapItem {
            dist: OrderedFloat(dist),
            item,
        });
    } else if let Some(top) = heap.peek() {
        if dist < top.dist.into_inner() {
            heap.pop();
            heap.push(HeapItem {
                dist: OrderedFloat(dist),
                item,
            });
        }
    }
}

fn build_node<T, M: Metric<T>, R: RngCore>(
    metric: &M,
    items: Vec<T>,
    depth: usize,
    params: &VpTreeParams,
    rng: &mut R,
    arena: &mut Vec<VpNode<T>>,
) -> NodeId {
    if depth > params.max_depth || items.len() < params.max_items_per_node {
        return push_leaf(arena, items, depth);
    }

    let mut items = items;
    let total = items.len();
    let mut shuffle_attempts = 0usize;

    loop {
        let anchor = items.remove(0);
        let distances: Vec<f64> = items.iter().map(|item| metric.distance(&anchor, item)).collect();

        let median = median_of(&distances);
        let mean = mean_of(&distances);

        let median_near_count = distances.iter().filter(|&&d| d <= median).count();
        let median_far_count = distances.len() - median_near_count;
        let mean_near_count = distances.iter().filter(|&&d| d <= mean).count();
        let mean_far_count = distances.len() - mean_near_count;

        let median_ratio = balance_ratio(median_near_count, median_far_count);
        let mean_ratio = balance_ratio(mean_near_count, mean_far_count);

        // Ties go to the median split.
        let (threshold, near_count, far_count) = if median_ratio >= mean_ratio {
            (median, median_near_count, median_far_count)
        } else {
            (mean, mean_near_count, mean_far_count)
        };

        let min_split_count = total as f64 * params.min_split_fraction;
        let acceptable = (near_count as f64) >= min_split_count && (far_count as f64) >= min_split_count;

        if acceptable {
            let mut near_items = Vec::with_capacity(near_count);
            let mut far_items = Vec::with_capacity(far_count);
            for (item, d) in items.into_iter().zip(distances.into_iter()) {
                if d <= threshold {
                    near_items.push(item);
                } else {
                    far_items.push(item);
                }
            }
            debug!(
                depth,
                threshold,
                near_count = near_items.len(),
                far_count = far_items.len(),
                "splitting vp-tree node"
            );
            let near = build_node(metric, near_items, depth + 1, params, rng, arena);
            let far = build_node(metric, far_items, depth + 1, params, rng, arena);
            arena.push(VpNode::Inner {
                anchor,
                threshold,
                near,
                far,
                depth,
            });
            return NodeId(arena.len() - 1);
        }

        items.push(anchor);
        shuffle_attempts += 1;
        if shuffle_attempts >= params.max_shuffle_attempts {
            warn!(
                depth,
                item_count = items.len(),
                "could not find an acceptable vp-tree split; storing an oversized leaf"
            );
            return push_leaf(arena, items, depth);
        }
        items.shuffle(rng);
    }
}

fn push_leaf<T>(arena: &mut Vec<VpNode<T>>, items: Vec<T>, depth: usize) -> NodeId {
    arena.push(VpNode::Leaf { items, depth });
    NodeId(arena.len() - 1)
}

fn balance_ratio(near: usize, far: usize) -> f64 {
    let (small, large) = if near <= far { (near, far) } else { (far, near) };
    if large == 0 {
        0.0
    } else {
        small as f64 / large as f64
    }
}

fn median_of(distances: &[f64]) -> f64 {
    let mut sorted = distances.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("distances must be comparable"));
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mean_of(distances: &[f64]) -> f64 {
    if distances.is_empty() {
        0.0
    } else {
        distances.iter().sum::<f64>() / distances.len() as f64
    }
}
