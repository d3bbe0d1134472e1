//! Reusable probe tasks and targets for integration tests.
//!
//! The probes are deterministic stand-ins for real work: they record
//! what the engine did (and in what order) into a shared [`Journal`],
//! which tests then assert against. The journal is excluded from value
//! identity so probes stay plain value tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{fmt, hash};

use anyhow::{Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use taskdag::context::RunContext;
use taskdag::impl_bundle;
use taskdag::resources::ResourceMap;
use taskdag::target::{MemoryTarget, NoTarget, Target, TargetRef};
use taskdag::task::{Task, TaskRef, TaskWithCleanup};

/// Shared, ordered log of engine-visible events.
///
/// Excluded from value identity: two probes differing only in recorded
/// events are the same task.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    #[serde(skip)]
    events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Index of the first occurrence of `event`, if recorded.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }

    /// Panics unless `earlier` was recorded before `later`.
    pub fn assert_order(&self, earlier: &str, later: &str) {
        let events = self.events();
        let a = events
            .iter()
            .position(|e| e == earlier)
            .unwrap_or_else(|| panic!("event {earlier:?} not recorded in {events:?}"));
        let b = events
            .iter()
            .position(|e| e == later)
            .unwrap_or_else(|| panic!("event {later:?} not recorded in {events:?}"));
        assert!(a < b, "expected {earlier:?} before {later:?} in {events:?}");
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Journal({} events)", self.events().len())
    }
}

impl PartialEq for Journal {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for Journal {}

impl hash::Hash for Journal {
    fn hash<H: hash::Hasher>(&self, _state: &mut H) {}
}

/// A target with a fixed existence answer, for done-task tests that
/// should not touch the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedTarget {
    pub name: String,
    pub present: bool,
}

impl_bundle!(FixedTarget);

impl FixedTarget {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: false,
        }
    }
}

impl Target for FixedTarget {
    fn exists(&self) -> bool {
        self.present
    }
}

/// General-purpose probe: configurable dependencies, target, resource
/// needs, failure, and run duration.
///
/// Records `requires:<name>` on discovery, `start:<name>` /
/// `end:<name>` around the run body, and `alloc:<name>` when the run
/// context carries an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTask {
    name: String,
    deps: Vec<TaskRef>,
    target: TargetRef,
    resources: ResourceMap,
    fail: bool,
    delay_ms: u64,
    journal: Journal,
}

impl_bundle!(ProbeTask);

impl ProbeTask {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            target: TargetRef::new(NoTarget),
            resources: ResourceMap::new(),
            fail: false,
            delay_ms: 0,
            journal: journal.clone(),
        }
    }

    pub fn after(mut self, dep: &TaskRef) -> Self {
        self.deps.push(dep.clone());
        self
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = target;
        self
    }

    pub fn with_resources(mut self, resources: ResourceMap) -> Self {
        self.resources = resources;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn into_ref(self) -> TaskRef {
        TaskRef::new(self)
    }
}

impl Task for ProbeTask {
    fn requires(&self) -> Vec<TaskRef> {
        self.journal.record(format!("requires:{}", self.name));
        self.deps.clone()
    }

    fn output(&self) -> TargetRef {
        self.target.clone()
    }

    fn resources(&self) -> ResourceMap {
        self.resources.clone()
    }

    fn run_async<'a>(
        &'a self,
        context: &'a RunContext,
        _inputs: &'a [TargetRef],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.journal.record(format!("start:{}", self.name));
            if context.allocation().is_some() {
                self.journal.record(format!("alloc:{}", self.name));
            }
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let result = if self.fail {
                Err(anyhow::anyhow!("{} failed on purpose", self.name))
            } else {
                Ok(())
            };
            self.journal.record(format!("end:{}", self.name));
            result
        }
        .boxed()
    }
}

/// Cleanup-capable probe; records `cleanup:<name>` when its cleanup
/// body actually runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CleanupProbeTask {
    name: String,
    deps: Vec<TaskRef>,
    fail_run: bool,
    fail_cleanup: bool,
    delay_ms: u64,
    journal: Journal,
}

impl_bundle!(CleanupProbeTask);

impl CleanupProbeTask {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            fail_run: false,
            fail_cleanup: false,
            delay_ms: 0,
            journal: journal.clone(),
        }
    }

    pub fn after(mut self, dep: &TaskRef) -> Self {
        self.deps.push(dep.clone());
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn into_ref(self) -> TaskRef {
        TaskRef::new(self)
    }
}

impl Task for CleanupProbeTask {
    fn requires(&self) -> Vec<TaskRef> {
        self.deps.clone()
    }

    fn run_async<'a>(
        &'a self,
        _context: &'a RunContext,
        _inputs: &'a [TargetRef],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.journal.record(format!("start:{}", self.name));
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let result = if self.fail_run {
                Err(anyhow::anyhow!("{} failed on purpose", self.name))
            } else {
                Ok(())
            };
            self.journal.record(format!("end:{}", self.name));
            result
        }
        .boxed()
    }

    fn as_cleanup(&self) -> Option<&dyn TaskWithCleanup> {
        Some(self)
    }
}

impl TaskWithCleanup for CleanupProbeTask {
    fn cleanup(&self) -> Result<()> {
        self.journal.record(format!("cleanup:{}", self.name));
        if self.fail_cleanup {
            bail!("{} cleanup failed on purpose", self.name);
        }
        Ok(())
    }
}

/// Produces a value into an in-memory slot and deletes it on cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotProducerTask {
    name: String,
    value: u64,
    slot: MemoryTarget,
    journal: Journal,
}

impl_bundle!(SlotProducerTask);

impl SlotProducerTask {
    pub fn new(name: impl Into<String>, value: u64, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            value,
            slot: MemoryTarget::new(),
            journal: journal.clone(),
        }
    }

    /// Handle to the slot, for asserting its state after a run.
    pub fn slot(&self) -> &MemoryTarget {
        &self.slot
    }

    pub fn into_ref(self) -> TaskRef {
        TaskRef::new(self)
    }
}

impl Task for SlotProducerTask {
    fn output(&self) -> TargetRef {
        TargetRef::new(self.slot.clone())
    }

    fn run(&self, _inputs: &[TargetRef]) -> Result<()> {
        self.journal.record(format!("produce:{}", self.name));
        self.slot.set(self.value)?;
        Ok(())
    }

    fn as_cleanup(&self) -> Option<&dyn TaskWithCleanup> {
        Some(self)
    }
}

impl TaskWithCleanup for SlotProducerTask {
    fn cleanup(&self) -> Result<()> {
        self.journal.record(format!("cleanup:{}", self.name));
        self.slot.delete()?;
        Ok(())
    }
}

/// Requires its partner, which requires it back: two of these with
/// swapped names form a dependency cycle for graph-construction tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CyclicTask {
    name: String,
    partner: String,
}

impl_bundle!(CyclicTask);

impl CyclicTask {
    pub fn new(name: impl Into<String>, partner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partner: partner.into(),
        }
    }

    pub fn into_ref(self) -> TaskRef {
        TaskRef::new(self)
    }
}

impl Task for CyclicTask {
    fn requires(&self) -> Vec<TaskRef> {
        vec![TaskRef::new(CyclicTask {
            name: self.partner.clone(),
            partner: self.name.clone(),
        })]
    }
}

/// Reads its producer's in-memory slot and records the value seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotConsumerTask {
    name: String,
    producer: TaskRef,
    journal: Journal,
}

impl_bundle!(SlotConsumerTask);

impl SlotConsumerTask {
    pub fn new(name: impl Into<String>, producer: &TaskRef, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            producer: producer.clone(),
            journal: journal.clone(),
        }
    }

    pub fn into_ref(self) -> TaskRef {
        TaskRef::new(self)
    }
}

impl Task for SlotConsumerTask {
    fn requires(&self) -> Vec<TaskRef> {
        vec![self.producer.clone()]
    }

    fn run(&self, inputs: &[TargetRef]) -> Result<()> {
        for input in inputs {
            if let Some(slot) = input.downcast_ref::<MemoryTarget>() {
                let value = slot.get::<u64>()?;
                self.journal.record(format!("consume:{}={}", self.name, value));
            }
        }
        Ok(())
    }
}
