//! Density-based clustering (DBSCAN) over arbitrary metric spaces, backed by a
//! vantage-point tree.
//!
//! Items only need to support a user-supplied distance function — there is no
//! requirement for a coordinate system or vector representation. See
//! [`cluster_items`] for the main entry point, [`Metric`] for the distance
//! contract, and [`vptree::VpTree`] for the underlying index if you need
//! range or k-NN queries directly.

pub mod dbscan;
pub mod errors;
pub mod identity;
#[cfg(feature = "setup_tracing")]
mod logging;
pub mod metric;
pub mod vptree;

pub use dbscan::{
    cluster_items, cluster_items_catching, cluster_items_seeded, cluster_items_with_progress,
    Label, OUTLIER,
};
pub use errors::MetricDbscanError;
pub use metric::Metric;
