//! Report reconciliation engine.
//!
//! Turns raw citizen infrastructure reports into a consistent view: each
//! report is matched to a registered asset, folded into a duplicate
//! cluster where several people reported the same issue, and rolled up
//! into per-asset discrepancies where the crowd disagrees with the
//! official condition. Passes run per geographic partition and are
//! idempotent against the `ReconStore` backend.

pub mod dedup;
pub mod discrepancy;
pub mod freshness;
pub mod lifecycle;
pub mod matcher;
pub mod partition;
pub mod pipeline;
pub mod similarity;
pub mod spatial;
pub mod store;

pub use dedup::DedupOutcome;
pub use freshness::StalenessSweep;
pub use lifecycle::TransitionOk;
pub use matcher::Candidate;
pub use partition::PartitionMap;
pub use pipeline::{CancelFlag, DedupStats, DiscrepancyStats, MatchStats, Reconciler};
pub use spatial::{Namespace, SpatialIndex};
pub use store::{MemoryStore, ReconStore};
