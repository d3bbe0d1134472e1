// src/task.rs

//! The task execution contract and its variants.
//!
//! A task is an immutable declaration of work: which tasks must run
//! first ([`requires`](Task::requires)), where the result lives
//! ([`output`](Task::output)), what pool counts the run needs
//! ([`resources`](Task::resources)), and the run body itself. Identity
//! is structural: two tasks with equal fields are the same graph node,
//! which is what lets the runner deduplicate a diamond of dependencies.
//!
//! Variants:
//! - [`TaskWithCleanup`]: adds a cleanup body, invoked only after the
//!   task's own run and every direct dependent's run have resolved
//! - [`ExternalTask`]: wraps a pre-existing target; never executed
//! - [`MemoryTask`]: output is an in-memory slot, cleanup releases it

use std::sync::Arc;
use std::{fmt, hash};

use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bundle::{self, Bundle};
use crate::context::RunContext;
use crate::errors::TargetError;
use crate::impl_bundle;
use crate::resources::ResourceMap;
use crate::target::{ExternalTarget, MemoryTarget, NoTarget, TargetRef};

/// The capability set every schedulable work item provides.
///
/// Every method has a default, so a minimal task only overrides what it
/// needs. Override either [`run`](Task::run) (synchronous body) or
/// [`run_async`](Task::run_async) (suspension-capable body; its default
/// calls `run`), not both.
pub trait Task: Bundle {
    /// Upstream tasks that must resolve before this one runs.
    fn requires(&self) -> Vec<TaskRef> {
        Vec::new()
    }

    /// Where this task's result lives.
    fn output(&self) -> TargetRef {
        TargetRef::new(NoTarget)
    }

    /// Pool counts the run needs; empty means no admission gate.
    fn resources(&self) -> ResourceMap {
        ResourceMap::new()
    }

    /// Whether the output already exists, making the run unnecessary.
    fn done(&self) -> bool {
        self.output().exists()
    }

    /// Synchronous run body. `inputs` are the outputs of the direct
    /// dependencies, in their scheduling order.
    fn run(&self, inputs: &[TargetRef]) -> Result<()> {
        let _ = inputs;
        Ok(())
    }

    /// Suspension-capable run body; the default delegates to
    /// [`run`](Task::run). The context carries the current resource
    /// allocation and any caller-supplied capabilities.
    fn run_async<'a>(
        &'a self,
        context: &'a RunContext,
        inputs: &'a [TargetRef],
    ) -> BoxFuture<'a, Result<()>> {
        let _ = context;
        async move { self.run(inputs) }.boxed()
    }

    /// Cleanup capability probe; cleanup-capable types return
    /// `Some(self)`.
    fn as_cleanup(&self) -> Option<&dyn TaskWithCleanup> {
        None
    }
}

/// A task with a post-dependents cleanup phase.
///
/// The cleanup body is invoked only after this task's own run unit and
/// every direct dependent's run unit have resolved (success or failure;
/// an upstream failure turns the cleanup into a dependency failure
/// without invoking the body).
pub trait TaskWithCleanup: Task {
    /// Synchronous cleanup body.
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Suspension-capable cleanup body; the default delegates to
    /// [`cleanup`](TaskWithCleanup::cleanup).
    fn cleanup_async<'a>(&'a self, context: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        let _ = context;
        async move { self.cleanup() }.boxed()
    }
}

/// Shared handle to a task with value equality.
///
/// Equality and hashing go through the task's structural identity, so
/// `TaskRef` works as a graph node and as a map key: two refs to equal
/// tasks collide, however they were constructed.
#[derive(Clone)]
pub struct TaskRef(Arc<dyn Task>);

impl TaskRef {
    pub fn new<T: Task>(task: T) -> Self {
        Self(Arc::new(task))
    }

    pub fn as_task(&self) -> &dyn Task {
        self.0.as_ref()
    }

    pub fn downcast_ref<T: Task>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    pub fn requires(&self) -> Vec<TaskRef> {
        self.0.requires()
    }

    pub fn output(&self) -> TargetRef {
        self.0.output()
    }

    pub fn resources(&self) -> ResourceMap {
        self.0.resources()
    }

    pub fn done(&self) -> bool {
        self.0.done()
    }

    pub fn as_cleanup(&self) -> Option<&dyn TaskWithCleanup> {
        self.0.as_cleanup()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        let other: &dyn Bundle = other.0.as_ref();
        self.0.eq_value(other)
    }
}

impl Eq for TaskRef {}

impl hash::Hash for TaskRef {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.hash_value(state);
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Serialize for TaskRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let task: &dyn Bundle = self.0.as_ref();
        let value = bundle::encode(task).map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        bundle::decode_task(&value).map_err(serde::de::Error::custom)
    }
}

/// A task whose output was produced outside this run.
///
/// `done()` goes through [`ExternalTarget`], which asserts the wrapped
/// target exists, so a missing input surfaces during graph construction.
/// The task has no dependencies and is never executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalTask {
    target: TargetRef,
}

impl_bundle!(ExternalTask);

impl ExternalTask {
    pub fn new(target: TargetRef) -> Self {
        Self { target }
    }
}

impl Task for ExternalTask {
    fn output(&self) -> TargetRef {
        TargetRef::new(ExternalTarget::new(self.target.clone()))
    }
}

/// A cleanup-capable task holding its result in an in-memory slot.
///
/// The slot never reports existing, so the task always runs; cleanup
/// deletes the held value once every direct dependent has consumed it.
/// Identity is the name alone, the slot is runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryTask {
    name: String,
    mem: MemoryTarget,
}

impl_bundle!(MemoryTask);

impl MemoryTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mem: MemoryTarget::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set<V: std::any::Any + Send + Sync>(&self, value: V) -> Result<(), TargetError> {
        self.mem.set(value)
    }

    pub fn get<V: std::any::Any + Send + Sync>(&self) -> Result<Arc<V>, TargetError> {
        self.mem.get()
    }
}

impl Task for MemoryTask {
    fn output(&self) -> TargetRef {
        TargetRef::new(self.mem.clone())
    }

    fn as_cleanup(&self) -> Option<&dyn TaskWithCleanup> {
        Some(self)
    }
}

impl TaskWithCleanup for MemoryTask {
    fn cleanup(&self) -> Result<()> {
        self.mem.delete()?;
        Ok(())
    }
}
