//! Integration tests for the vantage-point tree, exercised through the crate's
//! public API rather than `vptree`'s own `#[cfg(test)]` module.

use metric_dbscan::vptree::{VpTree, VpTreeParams};
use metric_dbscan::Metric;

struct AbsDiff;
impl Metric<i64> for AbsDiff {
    fn distance(&self, a: &i64, b: &i64) -> f64 {
        (a - b).unsigned_abs() as f64
    }
}

fn brute_force_range(items: &[i64], center: i64, radius: f64, include_boundary: bool) -> Vec<i64> {
    items
        .iter()
        .copied()
        .filter(|&v| {
            let d = (v - center).unsigned_abs() as f64;
            d < radius || (include_boundary && d == radius)
        })
        .collect()
}

#[test]
fn test_range_query_matches_brute_force_on_dense_integers() {
    let items: Vec<i64> = (-200..200).collect();
    let tree = VpTree::build_seeded(AbsDiff, items.clone(), &VpTreeParams::default(), 13).unwrap();

    for &(center, radius) in &[(0i64, 5.0), (-150, 12.0), (199, 1.0), (0, 0.5)] {
        let mut expected = brute_force_range(&items, center, radius, true);
        let mut got: Vec<i64> = tree.range_query(&center, radius, true).into_iter().copied().collect();
        expected.sort_unstable();
        got.sort_unstable();
        assert_eq!(got, expected, "center={center} radius={radius}");
    }
}

#[test]
fn test_range_query_matches_brute_force_on_sparse_integers() {
    let items: Vec<i64> = (0..500).step_by(7).collect();
    let tree = VpTree::build_seeded(AbsDiff, items.clone(), &VpTreeParams::default(), 29).unwrap();

    let mut expected = brute_force_range(&items, 250, 20.0, false);
    let mut got: Vec<i64> = tree.range_query(&250, 20.0, false).into_iter().copied().collect();
    expected.sort_unstable();
    got.sort_unstable();
    assert_eq!(got, expected);
}

#[test]
fn test_tree_with_duplicate_items_returns_all_duplicates() {
    let mut items = vec![42_i64; 30];
    items.extend(0..10);
    let tree = VpTree::build_seeded(AbsDiff, items, &VpTreeParams::default(), 3).unwrap();
    let found = tree.range_query(&42, 0.0, true);
    assert_eq!(found.len(), 30);
}

#[test]
fn test_single_item_tree() {
    let tree = VpTree::build(AbsDiff, vec![7_i64], &VpTreeParams::default()).unwrap();
    assert_eq!(tree.size(), 1);
    assert_eq!(tree.range_query(&7, 0.0, true).len(), 1);
    assert_eq!(tree.range_query(&7, 0.0, false).len(), 0);
}

#[test]
fn test_empty_tree_queries_return_nothing() {
    let tree = VpTree::build(AbsDiff, Vec::<i64>::new(), &VpTreeParams::default()).unwrap();
    assert_eq!(tree.size(), 0);
    assert!(tree.range_query(&0, 1000.0, true).is_empty());
    assert!(tree.knn_search(&0, 5).is_empty());
}

#[test]
fn test_different_seeds_produce_the_same_query_results() {
    let items: Vec<i64> = (0..300).collect();
    let tree_a = VpTree::build_seeded(AbsDiff, items.clone(), &VpTreeParams::default(), 1).unwrap();
    let tree_b = VpTree::build_seeded(AbsDiff, items, &VpTreeParams::default(), 99999).unwrap();

    let mut a: Vec<i64> = tree_a.range_query(&150, 10.0, true).into_iter().copied().collect();
    let mut b: Vec<i64> = tree_b.range_query(&150, 10.0, true).into_iter().copied().collect();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
}
