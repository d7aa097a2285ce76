//! Concrete scenarios over the real line (integers under absolute difference).

use metric_dbscan::{cluster_items, cluster_items_seeded, Metric, MetricDbscanError, OUTLIER};

struct AbsDiff;
impl Metric<i64> for AbsDiff {
    fn distance(&self, a: &i64, b: &i64) -> f64 {
        (a - b).unsigned_abs() as f64
    }
}

fn scenario_items() -> Vec<i64> {
    let mut items: Vec<i64> = (0..100).collect();
    items.extend(1000..2000);
    items.push(-10_000);
    items.push(10_000);
    items
}

// S1 — two dense blocks (100 and 1000 integers) plus two far outliers, under
// the real-line metric with min_pts=5, eps=4. Expect exactly two clusters and
// two outliers, with the larger block canonicalized as cluster 0.
#[test]
fn test_s1_two_blocks_and_two_outliers() {
    let items = scenario_items();
    let labels = cluster_items_seeded(&items, &AbsDiff, 5, 4.0, 11).unwrap();
    assert_eq!(labels.len(), items.len());

    let small_block_label = labels[0];
    let large_block_label = labels[100];
    assert_ne!(small_block_label, OUTLIER);
    assert_ne!(large_block_label, OUTLIER);
    assert_ne!(small_block_label, large_block_label);

    assert!(labels[0..100].iter().all(|&l| l == small_block_label));
    assert!(labels[100..1100].iter().all(|&l| l == large_block_label));
    assert_eq!(labels[1100], OUTLIER);
    assert_eq!(labels[1101], OUTLIER);

    assert_eq!(large_block_label, 0);
    assert_eq!(small_block_label, 1);

    let cluster_count = labels.iter().copied().filter(|&l| l != OUTLIER).max().unwrap() + 1;
    assert_eq!(cluster_count, 2);
}

// S6 — constructing with invalid parameters fails fast, before any query work.
#[test]
fn test_s6_invalid_min_pts_rejected() {
    let items = scenario_items();
    let err = cluster_items(&items, &AbsDiff, 1, 4.0).unwrap_err();
    assert!(matches!(err, MetricDbscanError::InvalidParameter { .. }));
}

#[test]
fn test_s6_invalid_eps_rejected() {
    let items = scenario_items();
    let err = cluster_items(&items, &AbsDiff, 5, 0.0).unwrap_err();
    assert!(matches!(err, MetricDbscanError::InvalidParameter { .. }));
}

#[test]
fn test_single_far_outlier_among_a_cluster() {
    let mut items: Vec<i64> = (0..30).collect();
    items.push(100_000);
    let labels = cluster_items_seeded(&items, &AbsDiff, 4, 2.0, 5).unwrap();
    assert_eq!(*labels.last().unwrap(), OUTLIER);
    assert!(labels[0..30].iter().all(|&l| l != OUTLIER));
}

#[test]
fn test_increasing_eps_merges_previously_separate_clusters() {
    let mut items: Vec<i64> = (0..20).collect();
    items.extend(30..50);

    let tight = cluster_items_seeded(&items, &AbsDiff, 4, 2.0, 5).unwrap();
    let wide = cluster_items_seeded(&items, &AbsDiff, 4, 15.0, 5).unwrap();

    let tight_distinct: std::collections::HashSet<i32> =
        tight.iter().copied().filter(|&l| l != OUTLIER).collect();
    let wide_distinct: std::collections::HashSet<i32> =
        wide.iter().copied().filter(|&l| l != OUTLIER).collect();

    assert_eq!(tight_distinct.len(), 2);
    assert_eq!(wide_distinct.len(), 1);
}
