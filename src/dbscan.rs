//! ## DBSCAN driver
//!
//! Drives neighbor queries against a [`VpTree`], labels every item as either a
//! cluster member or an outlier, and canonicalizes the labeling so cluster `0`
//! is always the largest. See the crate-level docs for the expansion
//! algorithm and its documented source of nondeterminism (border-item
//! reassignment).

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, info};

use crate::errors::MetricDbscanError;
use crate::identity::{with_ids, IndexedItem, WrappedMetric};
use crate::metric::Metric;
use crate::vptree::{VpTree, VpTreeParams};

/// A cluster label. `-1` ([`OUTLIER`]) denotes an outlier; `0..K-1` denote
/// cluster ids, with `0` always the largest cluster after canonicalization.
pub type Label = i32;

/// Label assigned to items that belong to no cluster.
pub const OUTLIER: Label = -1;

/// Groups `items` into clusters using DBSCAN, backed by a vantage-point tree
/// as the neighborhood oracle.
///
/// `min_pts` is the minimum neighborhood cardinality (including the item
/// itself) for an item to be a core item; `eps` is the neighborhood radius.
/// Neither mutates `items`; the returned vector has the same length and
/// order as the input.
///
/// # Errors
///
/// Returns [`MetricDbscanError::InvalidParameter`] if `min_pts <= 1` or
/// `eps <= 0.0`, before any clustering work begins.
pub fn cluster_items<T, M>(
    items: &[T],
    metric: &M,
    min_pts: usize,
    eps: f64,
) -> Result<Vec<Label>, MetricDbscanError>
where
    T: Clone,
    M: Metric<T>,
{
    cluster_impl(items, metric, min_pts, eps, None, None)
}

/// Like [`cluster_items`], seeding the VP-tree's construction-time shuffle
/// step deterministically. Clustering results are identical to the
/// unseeded call on a well-behaved metric: the seed only affects internal
/// tree shape, never which items are neighbors of which.
pub fn cluster_items_seeded<T, M>(
    items: &[T],
    metric: &M,
    min_pts: usize,
    eps: f64,
    seed: u64,
) -> Result<Vec<Label>, MetricDbscanError>
where
    T: Clone,
    M: Metric<T>,
{
    cluster_impl(items, metric, min_pts, eps, Some(seed), None)
}

/// Like [`cluster_items`], invoking `on_progress(current, total)` once per
/// item processed by the main expansion loop. This is a side channel: it
/// must not and does not affect the returned labels.
pub fn cluster_items_with_progress<T, M>(
    items: &[T],
    metric: &M,
    min_pts: usize,
    eps: f64,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<Vec<Label>, MetricDbscanError>
where
    T: Clone,
    M: Metric<T>,
{
    cluster_impl(items, metric, min_pts, eps, None, Some(on_progress))
}

/// Like [`cluster_items`], but catches a panicking metric and reports it as
/// [`MetricDbscanError::MetricFailure`] instead of unwinding past this call.
/// `T` and `M` must be unwind-safe from the caller's perspective; this
/// function asserts that on the caller's behalf, matching the "propagate
/// unchanged, never swallow" contract of a metric failure.
pub fn cluster_items_catching<T, M>(
    items: &[T],
    metric: &M,
    min_pts: usize,
    eps: f64,
) -> Result<Vec<Label>, MetricDbscanError>
where
    T: Clone,
    M: Metric<T>,
{
    catch_unwind(AssertUnwindSafe(|| cluster_items(items, metric, min_pts, eps)))
        .unwrap_or_else(|payload| {
            let reason = panic_message(&payload);
            Err(MetricDbscanError::MetricFailure(Box::new(std::io::Error::other(reason))))
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "metric panicked with a non-string payload".to_string()
    }
}

fn cluster_impl<T, M>(
    items: &[T],
    metric: &M,
    min_pts: usize,
    eps: f64,
    seed: Option<u64>,
    mut on_progress: Option<&mut dyn FnMut(usize, usize)>,
) -> Result<Vec<Label>, MetricDbscanError>
where
    T: Clone,
    M: Metric<T>,
{
    if min_pts <= 1 {
        return Err(MetricDbscanError::invalid_parameter(
            "minimum cluster size must be at least 2",
        ));
    }
    if eps <= 0.0 {
        return Err(MetricDbscanError::invalid_parameter(
            "maximum neighbor distance must be positive",
        ));
    }

    let n = items.len();
    let wrapped_items = with_ids(items.to_vec());
    // Kept outside the tree so we always have an `IndexedItem` on hand to use
    // as a query center for position `i`, independent of how the tree ended
    // up physically arranging items internally.
    let query_items = wrapped_items.clone();
    let wrapped_metric = WrappedMetric::new(metric);
    let params = VpTreeParams::default();
    let tree = match seed {
        Some(seed) => VpTree::build_seeded(wrapped_metric, wrapped_items, &params, seed)?,
        None => VpTree::build(wrapped_metric, wrapped_items, &params)?,
    };

    let neighbor_ids = |idx: usize| -> Vec<usize> {
        tree.range_query(&query_items[idx], eps, true)
            .into_iter()
            .map(IndexedItem::id)
            .collect()
    };

    let mut labels: Vec<Option<Label>> = vec![None; n];
    let mut next_cluster_id: Label = 0;

    for i in 0..n {
        if let Some(callback) = on_progress.as_deref_mut() {
            callback(i, n);
        }
        if labels[i].is_some() {
            continue;
        }

        let seeds = neighbor_ids(i);
        if seeds.len() < min_pts {
            labels[i] = Some(OUTLIER);
            continue;
        }

        let current_cluster_id = next_cluster_id;
        next_cluster_id += 1;
        labels[i] = Some(current_cluster_id);

        let mut frontier: Vec<usize> = seeds.into_iter().filter(|&s| s != i).collect();
        let mut seen_this_cluster: HashSet<usize> = HashSet::new();
        seen_this_cluster.insert(i);

        while let Some(j) = frontier.pop() {
            seen_this_cluster.insert(j);
            match labels[j] {
                Some(OUTLIER) => {
                    // Border item of the current cluster; do not expand from it.
                    labels[j] = Some(current_cluster_id);
                }
                Some(_) => {
                    // Already claimed by another cluster; first assignment wins.
                    // This is the documented source of nondeterminism in border
                    // reassignment (see the crate-level docs).
                }
                None => {
                    labels[j] = Some(current_cluster_id);
                    let more = neighbor_ids(j);
                    if more.len() >= min_pts {
                        for m in more {
                            if !seen_this_cluster.contains(&m) {
                                frontier.push(m);
                            }
                        }
                    }
                }
            }
        }

        debug!(cluster_id = current_cluster_id, size = seen_this_cluster.len(), "expanded cluster");
    }

    if let Some(callback) = on_progress.as_deref_mut() {
        callback(n, n);
    }

    let mut labels: Vec<Label> = labels
        .into_iter()
        .map(|l| l.expect("every item is labeled by the end of the expansion loop"))
        .collect();

    let cluster_count = next_cluster_id;
    remap_by_size(&mut labels);
    let outlier_count = labels.iter().filter(|&&l| l == OUTLIER).count();
    info!(cluster_count, outlier_count, total = n, "finished clustering");

    Ok(labels)
}

/// Remaps cluster ids so cluster `0` is the largest, cluster `1` the next
/// largest, and so on. Outliers stay `-1`.
///
/// Ties are broken by a stable sort on descending count: among clusters of
/// equal size, the one with the smaller pre-remap id keeps the smaller
/// post-remap id. This differs from a literal "larger original id wins
/// ties" reading of some reference implementations, which is not idempotent
/// (re-running it on an already-canonical vector can swap tied clusters back
/// and forth). A stable descending-count sort is idempotent by construction,
/// which this crate treats as the binding requirement.
fn remap_by_size(labels: &mut [Label]) {
    let Some(max_label) = labels.iter().copied().filter(|&l| l != OUTLIER).max() else {
        return;
    };
    let mut counts = vec![0usize; max_label as usize + 1];
    for &l in labels.iter() {
        if l != OUTLIER {
            counts[l as usize] += 1;
        }
    }

    let mut order: Vec<Label> = (0..=max_label).filter(|&l| counts[l as usize] > 0).collect();
    order.sort_by(|&a, &b| counts[b as usize].cmp(&counts[a as usize]));

    let mut remap = vec![OUTLIER; max_label as usize + 1];
    for (new_id, old_id) in order.into_iter().enumerate() {
        remap[old_id as usize] = new_id as Label;
    }

    for l in labels.iter_mut() {
        if *l != OUTLIER {
            *l = remap[*l as usize];
        }
    }
}
