//! The Registry Aggregator (§4.8): source fetchers, priority/dedup merge,
//! and offline package inspection.

pub mod aggregator;
pub mod package;
pub mod source;

pub use aggregator::{CatalogFilter, RegistryAggregator};
pub use package::{inspect as inspect_package, PackageInspection, MAX_PACKAGE_BYTES};
