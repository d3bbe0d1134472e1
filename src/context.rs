// src/context.rs

//! The capability bag threaded through run and cleanup bodies.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::resources::Allocation;

/// Opaque, cheap-to-clone context passed to `run_async` and
/// `cleanup_async`.
///
/// Carries the current resource [`Allocation`] (attached by the runner
/// for the duration of one run invocation) plus any typed capabilities
/// the caller supplied, e.g. a remote-submission handle. Capabilities
/// are keyed by type and never interpreted by the scheduler itself.
#[derive(Clone, Default)]
pub struct RunContext {
    capabilities: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    allocation: Option<Arc<tokio::sync::Mutex<Allocation>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a caller-supplied capability, replacing any previous value
    /// of the same type.
    pub fn with_capability<T: Any + Send + Sync>(mut self, value: T) -> Self {
        Arc::make_mut(&mut self.capabilities).insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Look up a capability by type.
    pub fn capability<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.capabilities
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    pub(crate) fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(Arc::new(tokio::sync::Mutex::new(allocation)));
        self
    }

    /// The resource allocation held for the current run invocation, if
    /// the task requested any counts. Tasks use it to release counts
    /// early or request more mid-run.
    pub fn allocation(&self) -> Option<Arc<tokio::sync::Mutex<Allocation>>> {
        self.allocation.clone()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("capabilities", &self.capabilities.len())
            .field("allocation", &self.allocation.is_some())
            .finish()
    }
}
