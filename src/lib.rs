// src/lib.rs

//! Generic task-dependency scheduler.
//!
//! Work items declare their dependencies, resource needs, and an
//! idempotent "already done" check; the scheduler builds the dependency
//! graph, topologically orders it, runs independent branches
//! concurrently gated by named resource pools, and runs post-dependents
//! cleanup for tasks that need it.
//!
//! ```no_run
//! # use taskdag::resources::{ResourceMap, ResourcePool};
//! # use taskdag::runner::Runner;
//! # use taskdag::task::TaskRef;
//! # async fn demo(roots: Vec<TaskRef>) -> anyhow::Result<()> {
//! let pool = ResourcePool::new(ResourceMap::new().with("cpu", 8));
//! let summary = Runner::new(pool).run(&roots).await?;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod context;
pub mod dag;
pub mod errors;
pub mod logging;
pub mod resources;
pub mod runner;
pub mod target;
pub mod task;

pub use context::RunContext;
pub use resources::{Allocation, ResourceMap, ResourcePool};
pub use runner::{RunSummary, Runner, TaskDag, build_graph};
pub use target::{ExternalTarget, LocalTarget, MemoryTarget, NoTarget, Target, TargetRef};
pub use task::{ExternalTask, MemoryTask, Task, TaskRef, TaskWithCleanup};
