//! Calling-context trees for sampled call-path profiles.
//!
//! A [`Tree`] records every distinct call path seen while sampling a
//! program, with per-node metric values laid out against a shared metric
//! vector. Trees from separate profiles of the same program can be folded
//! together with [`Tree::merge`], which sums coincident paths and widens the
//! metric vector when the profiles measured different things.

pub mod config;
pub mod error;
pub mod model;
pub mod tree;

pub use config::CctConfig;
pub use error::{CctError, ConfigError, MergeError, MetricError};
pub use model::{
    AssocInfo, CodeScope, CodeStructure, DynPayload, LogicalIp, LushAssoc, MetricDesc,
    MetricDescs, MetricKind, MetricValue, Node, NodeData, NodeIdAllocator, NodeKind, SharedStr,
};
pub use tree::{DumpOptions, MergeStats, NodeIndex, Tree};
