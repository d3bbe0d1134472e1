// src/resources.rs

//! Named-capacity resource admission.
//!
//! A [`ResourcePool`] gates concurrency by named counts: a task's run is
//! admitted once its requested counts fit the pool's `available` side,
//! and the counts move back from `used` on release. The pool only
//! blocks runs, it performs no execution itself, so it can just as well
//! cap concurrent cluster jobs as memory-heavy local tasks.
//!
//! Every release or capacity increase wakes all waiters; each waiter
//! rechecks its own predicate, so there is no fairness guarantee among
//! them. Shared state is confined to the two counters under one lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::errors::ResourceError;

/// Named-count multiset used for capacities, requests, and holdings.
///
/// Zero counts are normalised away: requesting or holding zero of a
/// resource is the same as not mentioning it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMap(BTreeMap<String, usize>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a zero count is dropped.
    pub fn with(mut self, name: impl Into<String>, count: usize) -> Self {
        if count > 0 {
            self.0.insert(name.into(), count);
        }
        self
    }

    pub fn get(&self, name: &str) -> usize {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, &count)| (name.as_str(), count))
    }

    /// True when every count fits within `limit`.
    pub fn fits_within(&self, limit: &ResourceMap) -> bool {
        self.0.iter().all(|(name, &count)| count <= limit.get(name))
    }

    /// First resource whose count exceeds `limit`, with both counts.
    pub fn first_excess(&self, limit: &ResourceMap) -> Option<(String, usize, usize)> {
        self.0.iter().find_map(|(name, &count)| {
            let cap = limit.get(name);
            (count > cap).then(|| (name.clone(), count, cap))
        })
    }

    pub fn merge(&mut self, other: &ResourceMap) {
        for (name, &count) in &other.0 {
            if count > 0 {
                *self.0.entry(name.clone()).or_insert(0) += count;
            }
        }
    }

    /// Remove `other`'s counts; the caller has already verified they
    /// fit. Entries reaching zero are dropped.
    pub fn subtract(&mut self, other: &ResourceMap) {
        for (name, &count) in &other.0 {
            if let Some(held) = self.0.get_mut(name) {
                *held = held.saturating_sub(count);
                if *held == 0 {
                    self.0.remove(name);
                }
            }
        }
    }
}

#[derive(Debug)]
struct PoolState {
    available: ResourceMap,
    used: ResourceMap,
}

impl PoolState {
    fn total(&self) -> ResourceMap {
        let mut total = self.available.clone();
        total.merge(&self.used);
        total
    }
}

/// Named-capacity admission control with suspend-until-available
/// allocation.
///
/// Invariant: `available[r] + used[r] == total[r]` for every resource,
/// maintained under a single lock.
#[derive(Debug)]
pub struct ResourcePool {
    state: Mutex<PoolState>,
    changed: Notify,
}

impl ResourcePool {
    pub fn new(capacity: ResourceMap) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                available: capacity,
                used: ResourceMap::new(),
            }),
            changed: Notify::new(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `request` from the pool, suspending until it fits.
    ///
    /// A request exceeding the pool's total capacity for any resource
    /// can never be satisfied and fails immediately with
    /// [`ResourceError::ExceedsTotal`], without suspending. The returned
    /// [`Allocation`] releases any still-held counts when dropped.
    pub async fn allocate(self: &Arc<Self>, request: ResourceMap) -> Result<Allocation, ResourceError> {
        self.acquire(&request).await?;
        Ok(Allocation {
            held: request,
            pool: Arc::clone(self),
        })
    }

    async fn acquire(&self, request: &ResourceMap) -> Result<(), ResourceError> {
        {
            let state = self.lock_state();
            if let Some((resource, requested, total)) = request.first_excess(&state.total()) {
                return Err(ResourceError::ExceedsTotal {
                    resource,
                    requested,
                    total,
                });
            }
        }
        loop {
            // Register interest before checking the predicate so a
            // release between the check and the await is not lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock_state();
                if request.fits_within(&state.available) {
                    state.available.subtract(request);
                    state.used.merge(request);
                    return Ok(());
                }
            }
            debug!(request = ?request, "waiting for resource availability");
            notified.await;
        }
    }

    fn return_counts(&self, part: &ResourceMap) -> Result<(), ResourceError> {
        {
            let mut state = self.lock_state();
            if let Some((resource, released, held)) = part.first_excess(&state.used) {
                return Err(ResourceError::ReleaseNotHeld {
                    resource,
                    released,
                    held,
                });
            }
            state.used.subtract(part);
            state.available.merge(part);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Grow the pool's total capacity, waking all waiters.
    pub fn add_capacity(&self, extra: ResourceMap) {
        {
            let mut state = self.lock_state();
            state.available.merge(&extra);
        }
        self.changed.notify_waiters();
    }

    pub fn available(&self) -> ResourceMap {
        self.lock_state().available.clone()
    }

    pub fn in_use(&self) -> ResourceMap {
        self.lock_state().used.clone()
    }

    pub fn total(&self) -> ResourceMap {
        self.lock_state().total()
    }
}

/// A held claim on pool counts, exclusively owned by one run
/// invocation.
///
/// Counts can be returned early, in part or in full; whatever is still
/// held when the allocation is dropped goes back to the pool.
#[derive(Debug)]
pub struct Allocation {
    held: ResourceMap,
    pool: Arc<ResourcePool>,
}

impl Allocation {
    /// Snapshot of the currently-held counts.
    pub fn held(&self) -> ResourceMap {
        self.held.clone()
    }

    /// Return part of the held counts to the pool, waking all waiters.
    pub fn release(&mut self, part: &ResourceMap) -> Result<(), ResourceError> {
        if let Some((resource, released, held)) = part.first_excess(&self.held) {
            return Err(ResourceError::ReleaseNotHeld {
                resource,
                released,
                held,
            });
        }
        self.pool.return_counts(part)?;
        self.held.subtract(part);
        Ok(())
    }

    /// Return everything still held.
    pub fn release_all(&mut self) -> Result<(), ResourceError> {
        let held = std::mem::take(&mut self.held);
        self.pool.return_counts(&held)
    }

    /// Request additional counts against the same pool, merging them
    /// into this allocation once granted.
    ///
    /// Holding part of a resource while waiting for more can deadlock:
    /// two allocations that each hold part of a resource and each wait
    /// for more than the other will release block forever. The pool
    /// does not detect this.
    pub async fn request(&mut self, more: ResourceMap) -> Result<(), ResourceError> {
        self.pool.acquire(&more).await?;
        self.held.merge(&more);
        Ok(())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let held = std::mem::take(&mut self.held);
        if let Err(err) = self.pool.return_counts(&held) {
            warn!(error = %err, "could not return counts on allocation drop");
        }
    }
}
