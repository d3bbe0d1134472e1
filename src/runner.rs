// src/runner.rs

//! Graph construction and concurrent execution.
//!
//! [`build_graph`] discovers the transitive dependency closure of a set
//! of root tasks, deduplicates by value equality, and topologically
//! orders it into a [`TaskDag`]. [`Runner::execute`] then spawns one
//! concurrent unit per task run and one per cleanup-capable task, joined
//! through shared futures so many dependents can await one outcome.
//!
//! Failure propagation is structural: a unit that fails collapses its
//! entire downstream cone into dependency failures without invoking
//! those bodies, while unrelated branches run to completion. The runner
//! never aborts early and never retries; every unit's outcome is
//! awaited and tallied into the final [`RunSummary`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::dag::DirectedGraph;
use crate::errors::{GraphError, TaskFailure};
use crate::resources::ResourcePool;
use crate::target::TargetRef;
use crate::task::TaskRef;

type UnitOutcome = Result<TaskRef, TaskFailure>;
type SharedUnit = Shared<BoxFuture<'static, UnitOutcome>>;

/// One scheduled task with its direct neighbors in the dependency
/// graph, both ordered by topological position.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: TaskRef,
    pub predecessors: Vec<TaskRef>,
    pub successors: Vec<TaskRef>,
}

/// Topologically ordered task list produced by [`build_graph`].
#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    nodes: Vec<TaskNode>,
}

impl TaskDag {
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskRef> {
        self.nodes.iter().map(|node| &node.task)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Discover, deduplicate, and topologically order the dependency
/// closure of `roots`.
///
/// A task that is already [`done`](crate::task::Task::done) is added as
/// a node but never expanded: its `requires()` is not consulted, so an
/// already-satisfied subtree costs nothing to schedule around.
pub fn build_graph(roots: &[TaskRef]) -> Result<TaskDag, GraphError<TaskRef>> {
    let mut graph = DirectedGraph::new();
    for root in roots {
        visit(&mut graph, root);
    }

    let order = graph.topological_order()?;
    let position: HashMap<TaskRef, usize> = order
        .iter()
        .enumerate()
        .map(|(index, task)| (task.clone(), index))
        .collect();
    let by_position = |set: std::collections::HashSet<TaskRef>| {
        let mut tasks: Vec<TaskRef> = set.into_iter().collect();
        tasks.sort_by_key(|task| position[task]);
        tasks
    };

    let nodes = order
        .iter()
        .map(|task| {
            let neighbors = graph.neighbors(task);
            TaskNode {
                task: task.clone(),
                predecessors: by_position(neighbors.predecessors),
                successors: by_position(neighbors.successors),
            }
        })
        .collect();
    Ok(TaskDag { nodes })
}

fn visit(graph: &mut DirectedGraph<TaskRef>, task: &TaskRef) {
    if graph.has(task) {
        return;
    }
    graph.add_node(task.clone());
    if task.done() {
        debug!(task = %task, "already satisfied, not expanding");
        return;
    }
    for dependency in task.requires() {
        visit(graph, &dependency);
        graph.add_edge(dependency, task.clone());
    }
}

/// Drives concurrent execution of a [`TaskDag`].
pub struct Runner {
    pool: Arc<ResourcePool>,
    context: RunContext,
}

impl Runner {
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        Self {
            pool,
            context: RunContext::new(),
        }
    }

    /// Replace the base context threaded through every run and cleanup
    /// body.
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    /// Convenience: [`build_graph`] then [`execute`](Runner::execute).
    pub async fn run(&self, roots: &[TaskRef]) -> Result<RunSummary, GraphError<TaskRef>> {
        let dag = build_graph(roots)?;
        Ok(self.execute(&dag).await)
    }

    /// Execute every task in the dag, one concurrent unit per run and
    /// one per cleanup-capable task.
    ///
    /// A run unit awaits every predecessor unit (any failure resolves it
    /// as a dependency failure without invoking the body), acquires a
    /// pool allocation sized by the task's `resources()`, then invokes
    /// the run body. A cleanup unit awaits the task's own run unit plus
    /// all direct successors' run units. Every unit is awaited to
    /// completion regardless of individual failures; nothing is
    /// cancelled and nothing is retried.
    pub async fn execute(&self, dag: &TaskDag) -> RunSummary {
        let mut units: HashMap<TaskRef, SharedUnit> = HashMap::with_capacity(dag.len());
        let mut run_units: Vec<(bool, SharedUnit)> = Vec::with_capacity(dag.len());

        for node in dag.nodes() {
            let satisfied = node.task.done();
            let unit = if satisfied {
                info!(task = %node.task, "already done");
                let task = node.task.clone();
                async move { Ok(task) }.boxed().shared()
            } else {
                let dependencies: Vec<SharedUnit> = node
                    .predecessors
                    .iter()
                    .map(|dependency| units[dependency].clone())
                    .collect();
                spawn_unit(
                    run_unit(
                        node.task.clone(),
                        dependencies,
                        Arc::clone(&self.pool),
                        self.context.clone(),
                    ),
                    node.task.clone(),
                    UnitKind::Run,
                )
            };
            units.insert(node.task.clone(), unit.clone());
            run_units.push((satisfied, unit));
        }

        let mut cleanup_units: Vec<SharedUnit> = Vec::new();
        for node in dag.nodes().iter().rev() {
            if node.task.as_cleanup().is_none() {
                continue;
            }
            let mut awaited: Vec<SharedUnit> = vec![units[&node.task].clone()];
            awaited.extend(node.successors.iter().map(|successor| units[successor].clone()));
            cleanup_units.push(spawn_unit(
                cleanup_unit(node.task.clone(), awaited, self.context.clone()),
                node.task.clone(),
                UnitKind::Cleanup,
            ));
        }

        info!(tasks = dag.len(), "scheduling complete, starting run");
        let run_outcomes = join_all(run_units.iter().map(|(_, unit)| unit.clone())).await;
        let cleanup_outcomes = join_all(cleanup_units).await;

        let mut summary = RunSummary::default();
        for ((satisfied, _), outcome) in run_units.iter().zip(run_outcomes) {
            match outcome {
                Ok(_) if *satisfied => summary.already_satisfied += 1,
                Ok(_) => summary.run_successes += 1,
                Err(TaskFailure::Dependency { .. }) => summary.run_dependency_failures += 1,
                Err(failure) => summary.run_failures.push(failure),
            }
        }
        for outcome in cleanup_outcomes {
            match outcome {
                Ok(_) => summary.cleanup_successes += 1,
                Err(TaskFailure::Dependency { .. }) => summary.cleanup_dependency_failures += 1,
                Err(failure) => summary.cleanup_failures.push(failure),
            }
        }
        summary.log_report();
        summary
    }
}

#[derive(Clone, Copy)]
enum UnitKind {
    Run,
    Cleanup,
}

/// Spawn a unit onto the runtime and wrap its handle as a re-awaitable
/// shared future. The spawn boundary contains panics: a panicking body
/// is recorded as a direct failure of that unit.
fn spawn_unit(
    unit: impl Future<Output = UnitOutcome> + Send + 'static,
    task: TaskRef,
    kind: UnitKind,
) -> SharedUnit {
    let handle = tokio::spawn(unit);
    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                warn!(task = %task, error = %join_error, "unit aborted");
                let cause = Arc::new(anyhow::anyhow!("task panicked: {join_error}"));
                Err(match kind {
                    UnitKind::Run => TaskFailure::Run {
                        task: task.to_string(),
                        cause,
                    },
                    UnitKind::Cleanup => TaskFailure::Cleanup {
                        task: task.to_string(),
                        cause,
                    },
                })
            }
        }
    }
    .boxed()
    .shared()
}

async fn run_unit(
    task: TaskRef,
    dependencies: Vec<SharedUnit>,
    pool: Arc<ResourcePool>,
    context: RunContext,
) -> UnitOutcome {
    let mut inputs: Vec<TargetRef> = Vec::with_capacity(dependencies.len());
    if !dependencies.is_empty() {
        debug!(task = %task, "run waiting on dependencies");
        for outcome in join_all(dependencies).await {
            match outcome {
                Ok(dependency) => inputs.push(dependency.output()),
                Err(upstream) => {
                    debug!(task = %task, upstream = %upstream, "dependency failed, not running");
                    return Err(TaskFailure::Dependency {
                        task: task.to_string(),
                    });
                }
            }
        }
    }

    let request = task.resources();
    let context = if request.is_empty() {
        context
    } else {
        debug!(task = %task, request = ?request, "requesting allocation");
        match pool.allocate(request).await {
            Ok(allocation) => context.with_allocation(allocation),
            Err(err) => {
                warn!(task = %task, error = %err, "allocation failed");
                return Err(TaskFailure::Run {
                    task: task.to_string(),
                    cause: Arc::new(err.into()),
                });
            }
        }
    };

    info!(task = %task, "run entered");
    match task.as_task().run_async(&context, &inputs).await {
        Ok(()) => {
            info!(task = %task, "run done");
            Ok(task)
        }
        Err(cause) => {
            warn!(task = %task, error = %cause, "run failed");
            Err(TaskFailure::Run {
                task: task.to_string(),
                cause: Arc::new(cause),
            })
        }
    }
    // Dropping the context releases any counts the allocation still
    // holds, waking pool waiters.
}

async fn cleanup_unit(task: TaskRef, awaited: Vec<SharedUnit>, context: RunContext) -> UnitOutcome {
    debug!(task = %task, "cleanup waiting on run units");
    for outcome in join_all(awaited).await {
        if let Err(upstream) = outcome {
            debug!(task = %task, upstream = %upstream, "dependency failed, not cleaning up");
            return Err(TaskFailure::Dependency {
                task: task.to_string(),
            });
        }
    }

    info!(task = %task, "cleanup entered");
    let result = match task.as_cleanup() {
        Some(cleanup) => cleanup.cleanup_async(&context).await,
        None => Ok(()),
    };
    match result {
        Ok(()) => {
            info!(task = %task, "cleanup done");
            Ok(task)
        }
        Err(cause) => {
            warn!(task = %task, error = %cause, "cleanup failed");
            Err(TaskFailure::Cleanup {
                task: task.to_string(),
                cause: Arc::new(cause),
            })
        }
    }
}

/// Aggregate outcome of one [`Runner::execute`] pass.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Tasks already done at unit creation, resolved without running.
    pub already_satisfied: usize,
    pub run_successes: usize,
    pub run_failures: Vec<TaskFailure>,
    pub run_dependency_failures: usize,
    pub cleanup_successes: usize,
    pub cleanup_failures: Vec<TaskFailure>,
    pub cleanup_dependency_failures: usize,
}

impl RunSummary {
    /// True iff no direct or dependency failure occurred in either
    /// phase.
    pub fn is_success(&self) -> bool {
        self.run_failures.is_empty()
            && self.cleanup_failures.is_empty()
            && self.run_dependency_failures == 0
            && self.cleanup_dependency_failures == 0
    }

    /// Emit the aggregate report through `tracing`.
    pub fn log_report(&self) {
        for failure in &self.run_failures {
            warn!(%failure, "run failure");
        }
        for failure in &self.cleanup_failures {
            warn!(%failure, "cleanup failure");
        }
        if self.is_success() {
            info!(
                already_satisfied = self.already_satisfied,
                run_successes = self.run_successes,
                cleanup_successes = self.cleanup_successes,
                "all tasks successful"
            );
        } else {
            warn!(
                already_satisfied = self.already_satisfied,
                run_successes = self.run_successes,
                run_failures = self.run_failures.len(),
                run_dependency_failures = self.run_dependency_failures,
                cleanup_successes = self.cleanup_successes,
                cleanup_failures = self.cleanup_failures.len(),
                cleanup_dependency_failures = self.cleanup_dependency_failures,
                "there were failed tasks"
            );
        }
    }
}
