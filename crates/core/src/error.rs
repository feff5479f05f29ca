use thiserror::Error;

use crate::model::{MetricKind, NodeKind};

/// Errors from per-node metric storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric index {index} out of bounds for {len} slots")]
    OutOfBounds { index: usize, len: usize },
    #[error("expected {expected} metric values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("cannot insert metric slots at {at}: node has {len} slots")]
    InvalidOffset { at: usize, len: usize },
}

/// Errors that make a merge meaningless. Checked before any node is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error(
        "metric layout mismatch: shared vector has {shared} slots, \
         this tree {this} (+{new_metrics} new), other tree {other} at offset {offset}"
    )]
    LayoutMismatch {
        shared: usize,
        this: usize,
        other: usize,
        offset: usize,
        new_metrics: usize,
    },
    #[error("metric slot {slot} is {shared:?} in the shared vector but {found:?} in the input")]
    MetricKindMismatch {
        slot: usize,
        shared: MetricKind,
        found: MetricKind,
    },
    #[error("node id {id} exists in both trees")]
    IdCollision { id: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CctError {
    #[error("stale node handle")]
    StaleNode,
    #[error("tree already has a root")]
    RootExists,
    #[error("node id space exhausted")]
    IdsExhausted,
    #[error("node arena is full")]
    ArenaFull,
    #[error("root nodes can only be created through create_root")]
    RootInsert,
    #[error("{kind} nodes carry no metrics")]
    NotDynamic { kind: NodeKind },
    #[error("metric: {0}")]
    Metric(#[from] MetricError),
    #[error("merge: {0}")]
    Merge(#[from] MergeError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}
