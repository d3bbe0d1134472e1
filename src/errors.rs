// src/errors.rs

//! Crate-wide error taxonomies.
//!
//! Failures are split by concern rather than collected in one catch-all:
//! - [`GraphError`] for graph traversal and cycle detection
//! - [`ResourceError`] for pool admission and release accounting
//! - [`TaskFailure`] for run/cleanup unit outcomes (cloneable, so one
//!   unit's failure can be observed by every dependent)
//! - [`TargetError`] for in-memory target slot misuse
//! - [`BundleError`] for tagged value encoding/decoding

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors from [`DirectedGraph`](crate::dag::DirectedGraph) operations.
#[derive(Debug, Error)]
pub enum GraphError<N>
where
    N: fmt::Debug,
{
    /// `pop_edge` was called on a node with no remaining edges.
    #[error("node has no remaining edges")]
    EmptyNode,

    /// Topological ordering terminated with edges still in the graph.
    ///
    /// The residual edges form one or more cycles; no partial order is
    /// ever returned alongside this.
    #[error("cycle detected; residual edges: {residual:?}")]
    Cycle { residual: Vec<(N, N)> },
}

/// Errors from [`ResourcePool`](crate::resources::ResourcePool) accounting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The request can never be satisfied: it exceeds the pool's total
    /// capacity for some resource. Reported immediately, without
    /// suspending.
    #[error("requested {resource}={requested} exceeds total pool capacity {total}")]
    ExceedsTotal {
        resource: String,
        requested: usize,
        total: usize,
    },

    /// A release tried to return more of a resource than is currently
    /// held.
    #[error("released {resource}={released} but only {held} currently held")]
    ReleaseNotHeld {
        resource: String,
        released: usize,
        held: usize,
    },
}

/// Outcome of a failed run or cleanup unit.
///
/// Cloneable on purpose: a unit's outcome is shared with every direct
/// dependent, which converts an upstream failure into its own
/// [`TaskFailure::Dependency`] without invoking the task body.
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    /// The task's own run body returned an error (or panicked).
    #[error("run of {task} failed: {cause}")]
    Run {
        task: String,
        cause: Arc<anyhow::Error>,
    },

    /// The task's cleanup body returned an error (or panicked).
    #[error("cleanup of {task} failed: {cause}")]
    Cleanup {
        task: String,
        cause: Arc<anyhow::Error>,
    },

    /// An awaited upstream unit failed; this task's body was never
    /// invoked.
    #[error("{task} not run: upstream failure")]
    Dependency { task: String },
}

impl TaskFailure {
    /// The rendering of the task this failure belongs to.
    pub fn task(&self) -> &str {
        match self {
            TaskFailure::Run { task, .. }
            | TaskFailure::Cleanup { task, .. }
            | TaskFailure::Dependency { task } => task,
        }
    }

    /// True for failures propagated from upstream rather than raised by
    /// the task's own body.
    pub fn is_dependency(&self) -> bool {
        matches!(self, TaskFailure::Dependency { .. })
    }
}

/// Misuse of a [`MemoryTarget`](crate::target::MemoryTarget) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("memory target value already set")]
    AlreadySet,

    #[error("memory target value not set")]
    Unset,

    #[error("memory target value was deleted")]
    Deleted,

    #[error("memory target holds a value of a different type")]
    WrongType,
}

/// Errors from tagged value encoding/decoding.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The input was not a single-key tagged object.
    #[error("malformed bundle encoding: {0}")]
    Malformed(String),

    /// No decoder was registered for the given type tag.
    #[error("unknown bundle type `{0}`")]
    UnknownType(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
