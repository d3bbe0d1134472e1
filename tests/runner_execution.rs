use taskdag::context::RunContext;
use taskdag::errors::TaskFailure;
use taskdag::resources::{ResourceMap, ResourcePool};
use taskdag::runner::{Runner, build_graph};
use taskdag::target::TargetRef;
use taskdag::task::{ExternalTask, TaskRef};
use taskdag_test_utils::builders::{CyclicTask, FixedTarget, Journal, ProbeTask};
use taskdag_test_utils::{init_tracing, with_timeout};

fn runner() -> Runner {
    Runner::new(ResourcePool::new(ResourceMap::new()))
}

fn diamond(journal: &Journal) -> (TaskRef, TaskRef, TaskRef, TaskRef) {
    let a = ProbeTask::new("a", journal).into_ref();
    let b = ProbeTask::new("b", journal).after(&a).into_ref();
    let c = ProbeTask::new("c", journal).after(&a).into_ref();
    let d = ProbeTask::new("d", journal).after(&b).after(&c).into_ref();
    (a, b, c, d)
}

#[test]
fn build_graph_orders_a_diamond() {
    init_tracing();
    let journal = Journal::new();
    let (a, b, c, d) = diamond(&journal);

    let dag = build_graph(std::slice::from_ref(&d)).unwrap();
    assert_eq!(dag.len(), 4);

    let position = |task: &TaskRef| dag.tasks().position(|t| t == task).unwrap();
    assert!(position(&a) < position(&b));
    assert!(position(&a) < position(&c));
    assert!(position(&b) < position(&d));
    assert!(position(&c) < position(&d));

    let root = dag.nodes().last().unwrap();
    assert_eq!(root.task, d);
    assert_eq!(root.predecessors.len(), 2);
    assert!(root.successors.is_empty());
}

#[test]
fn build_graph_deduplicates_by_value_equality() {
    init_tracing();
    let journal = Journal::new();
    // Two distinct refs to structurally equal tasks are one node.
    let shared_one = ProbeTask::new("shared", &journal).into_ref();
    let shared_two = ProbeTask::new("shared", &journal).into_ref();
    let left = ProbeTask::new("left", &journal).after(&shared_one).into_ref();
    let right = ProbeTask::new("right", &journal).after(&shared_two).into_ref();

    let dag = build_graph(&[left, right]).unwrap();
    assert_eq!(dag.len(), 3);
}

#[tokio::test]
async fn diamond_runs_in_dependency_order() {
    init_tracing();
    let journal = Journal::new();
    let (_a, _b, _c, d) = diamond(&journal);

    let summary = with_timeout(runner().run(&[d])).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.run_successes, 4);
    assert_eq!(summary.already_satisfied, 0);

    journal.assert_order("end:a", "start:b");
    journal.assert_order("end:a", "start:c");
    journal.assert_order("end:b", "start:d");
    journal.assert_order("end:c", "start:d");
}

#[tokio::test]
async fn failure_collapses_the_dependent_cone_only() {
    init_tracing();
    let journal = Journal::new();
    let a = ProbeTask::new("a", &journal).failing().into_ref();
    let b = ProbeTask::new("b", &journal).after(&a).into_ref();
    let c = ProbeTask::new("c", &journal).after(&b).into_ref();
    let lone = ProbeTask::new("lone", &journal).into_ref();

    let summary = with_timeout(runner().run(&[c, lone])).await.unwrap();
    assert!(!summary.is_success());
    assert_eq!(summary.run_failures.len(), 1);
    assert!(summary.run_failures[0].task().contains("\"a\""));
    assert!(!summary.run_failures[0].is_dependency());
    assert_eq!(summary.run_dependency_failures, 2);
    assert_eq!(summary.run_successes, 1);

    // The failed cone never entered its run bodies; the unrelated
    // branch ran to completion.
    assert!(journal.contains("start:a"));
    assert!(!journal.contains("start:b"));
    assert!(!journal.contains("start:c"));
    assert!(journal.contains("end:lone"));
}

#[tokio::test]
async fn done_task_is_not_expanded_and_not_run() {
    init_tracing();
    let journal = Journal::new();
    let hidden = ProbeTask::new("hidden", &journal).into_ref();
    let pre = ProbeTask::new("pre", &journal)
        .with_target(TargetRef::new(FixedTarget::present("pre-output")))
        .after(&hidden)
        .into_ref();
    let top = ProbeTask::new("top", &journal).after(&pre).into_ref();

    let dag = build_graph(std::slice::from_ref(&top)).unwrap();
    // `pre` is in the ordered list, but its dependency was never
    // discovered because a done task's requires() is not consulted.
    assert_eq!(dag.len(), 2);
    assert!(dag.tasks().any(|t| t == &pre));
    assert!(!journal.contains("requires:pre"));

    let summary = with_timeout(runner().execute(&dag)).await;
    assert!(summary.is_success());
    assert_eq!(summary.already_satisfied, 1);
    assert_eq!(summary.run_successes, 1);
    assert!(!journal.contains("start:pre"));
    assert!(journal.contains("end:top"));
}

#[tokio::test]
async fn external_task_resolves_as_already_satisfied() {
    init_tracing();
    let journal = Journal::new();
    let external = TaskRef::new(ExternalTask::new(TargetRef::new(FixedTarget::present(
        "upstream-data",
    ))));
    let consumer = ProbeTask::new("consumer", &journal).after(&external).into_ref();

    let summary = with_timeout(runner().run(&[consumer])).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.already_satisfied, 1);
    assert_eq!(summary.run_successes, 1);
}

#[tokio::test]
async fn cyclic_requirements_fail_graph_construction() {
    init_tracing();
    let x = CyclicTask::new("x", "y").into_ref();

    assert!(runner().run(std::slice::from_ref(&x)).await.is_err());
}

#[tokio::test]
async fn pool_capacity_serializes_resource_hungry_tasks() {
    init_tracing();
    let journal = Journal::new();
    let first = ProbeTask::new("first", &journal)
        .with_resources(ResourceMap::new().with("slot", 1))
        .with_delay_ms(30)
        .into_ref();
    let second = ProbeTask::new("second", &journal)
        .with_resources(ResourceMap::new().with("slot", 1))
        .with_delay_ms(30)
        .into_ref();

    let pool = ResourcePool::new(ResourceMap::new().with("slot", 1));
    let summary = with_timeout(Runner::new(pool).run(&[first, second]))
        .await
        .unwrap();
    assert!(summary.is_success());

    // With one slot, the runs must not overlap; either order is fine.
    let runs: Vec<String> = journal
        .events()
        .into_iter()
        .filter(|e| e.starts_with("start:") || e.starts_with("end:"))
        .collect();
    assert!(
        runs == ["start:first", "end:first", "start:second", "end:second"]
            || runs == ["start:second", "end:second", "start:first", "end:first"],
        "interleaved runs: {runs:?}"
    );
    assert!(journal.contains("alloc:first"));
    assert!(journal.contains("alloc:second"));
}

#[tokio::test]
async fn tasks_without_resource_needs_get_no_allocation() {
    init_tracing();
    let journal = Journal::new();
    let free = ProbeTask::new("free", &journal).into_ref();

    let summary = with_timeout(runner().run(&[free])).await.unwrap();
    assert!(summary.is_success());
    assert!(!journal.contains("alloc:free"));
}

#[tokio::test]
async fn empty_root_set_is_a_successful_noop() {
    init_tracing();
    let summary = with_timeout(runner().run(&[])).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.run_successes, 0);
    assert_eq!(summary.already_satisfied, 0);
}

#[test]
fn context_capabilities_are_typed_and_opaque() {
    #[derive(Debug, PartialEq)]
    struct RemoteHandle(&'static str);

    let context = RunContext::new().with_capability(RemoteHandle("cluster-7"));
    assert_eq!(
        context.capability::<RemoteHandle>().unwrap().0,
        "cluster-7"
    );
    assert!(context.capability::<String>().is_none());
    assert!(context.allocation().is_none());

    // Clones share the same capability set.
    let clone = context.clone();
    assert!(clone.capability::<RemoteHandle>().is_some());
}

#[test]
fn task_failure_classification() {
    let failure = TaskFailure::Dependency {
        task: "t".to_string(),
    };
    assert!(failure.is_dependency());
    assert_eq!(failure.task(), "t");
}
