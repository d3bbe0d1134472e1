use std::sync::Arc;
use std::time::Duration;

use taskdag::errors::ResourceError;
use taskdag::resources::{ResourceMap, ResourcePool};
use taskdag_test_utils::{init_tracing, with_timeout};

fn counts(pairs: &[(&str, usize)]) -> ResourceMap {
    pairs
        .iter()
        .fold(ResourceMap::new(), |map, &(name, count)| map.with(name, count))
}

#[tokio::test]
async fn oversized_request_fails_immediately() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 2)]));

    let err = with_timeout(pool.allocate(counts(&[("gpu", 3)])))
        .await
        .unwrap_err();
    match err {
        ResourceError::ExceedsTotal {
            resource,
            requested,
            total,
        } => {
            assert_eq!(resource, "gpu");
            assert_eq!(requested, 3);
            assert_eq!(total, 2);
        }
        other => panic!("expected ExceedsTotal, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_request_counts_held_resources_as_capacity() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 2)]));
    let _held = with_timeout(pool.allocate(counts(&[("gpu", 2)]))).await.unwrap();

    // gpu=2 is within total even though nothing is available right now,
    // so this request suspends rather than failing; gpu=3 still fails.
    let err = with_timeout(pool.allocate(counts(&[("gpu", 3)])))
        .await
        .unwrap_err();
    assert!(matches!(err, ResourceError::ExceedsTotal { .. }));
}

#[tokio::test]
async fn conflicting_allocations_serialize() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 3)]));

    let first = with_timeout(pool.allocate(counts(&[("gpu", 2)]))).await.unwrap();

    let waiter = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.allocate(counts(&[("gpu", 2)])).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "second allocation should be suspended");

    drop(first);
    let second = with_timeout(waiter).await.unwrap().unwrap();
    assert_eq!(second.held().get("gpu"), 2);
    assert_eq!(pool.in_use().get("gpu"), 2);
}

#[tokio::test]
async fn partial_release_frees_counts_for_waiters() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("mem", 4)]));

    let mut big = with_timeout(pool.allocate(counts(&[("mem", 4)]))).await.unwrap();

    let waiter = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.allocate(counts(&[("mem", 1)])).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    big.release(&counts(&[("mem", 1)])).unwrap();
    assert_eq!(big.held().get("mem"), 3);

    let small = with_timeout(waiter).await.unwrap().unwrap();
    assert_eq!(small.held().get("mem"), 1);
    assert_eq!(pool.available().get("mem"), 0);
}

#[tokio::test]
async fn over_release_is_rejected() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 2)]));
    let mut alloc = with_timeout(pool.allocate(counts(&[("gpu", 1)]))).await.unwrap();

    let err = alloc.release(&counts(&[("gpu", 2)])).unwrap_err();
    match err {
        ResourceError::ReleaseNotHeld {
            resource,
            released,
            held,
        } => {
            assert_eq!(resource, "gpu");
            assert_eq!(released, 2);
            assert_eq!(held, 1);
        }
        other => panic!("expected ReleaseNotHeld, got {other:?}"),
    }
    // The failed release must not have changed any accounting.
    assert_eq!(alloc.held().get("gpu"), 1);
    assert_eq!(pool.in_use().get("gpu"), 1);
}

#[tokio::test]
async fn drop_returns_everything_still_held() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 2), ("mem", 1)]));

    {
        let _alloc = with_timeout(pool.allocate(counts(&[("gpu", 2), ("mem", 1)])))
            .await
            .unwrap();
        assert_eq!(pool.available().get("gpu"), 0);
        assert_eq!(pool.in_use().get("mem"), 1);
    }

    assert_eq!(pool.available(), counts(&[("gpu", 2), ("mem", 1)]));
    assert!(pool.in_use().is_empty());
}

#[tokio::test]
async fn added_capacity_wakes_waiters() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("slot", 1)]));
    let held = with_timeout(pool.allocate(counts(&[("slot", 1)]))).await.unwrap();

    let waiter = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.allocate(counts(&[("slot", 1)])).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    pool.add_capacity(counts(&[("slot", 1)]));
    let second = with_timeout(waiter).await.unwrap().unwrap();
    assert_eq!(second.held().get("slot"), 1);
    assert_eq!(pool.total().get("slot"), 2);
    drop(held);
}

#[tokio::test]
async fn mid_task_request_merges_into_the_allocation() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 3)]));
    let mut alloc = with_timeout(pool.allocate(counts(&[("gpu", 1)]))).await.unwrap();

    with_timeout(alloc.request(counts(&[("gpu", 2)]))).await.unwrap();
    assert_eq!(alloc.held().get("gpu"), 3);
    assert_eq!(pool.available().get("gpu"), 0);

    let err = with_timeout(alloc.request(counts(&[("gpu", 4)]))).await.unwrap_err();
    assert!(matches!(err, ResourceError::ExceedsTotal { .. }));
    // The rejected request left the holding unchanged.
    assert_eq!(alloc.held().get("gpu"), 3);
}

#[tokio::test]
async fn empty_request_never_suspends() {
    init_tracing();
    let pool = ResourcePool::new(ResourceMap::new());

    let alloc = with_timeout(pool.allocate(ResourceMap::new())).await.unwrap();
    assert!(alloc.held().is_empty());
}

#[tokio::test]
async fn release_all_empties_the_allocation() {
    init_tracing();
    let pool = ResourcePool::new(counts(&[("gpu", 2)]));
    let mut alloc = with_timeout(pool.allocate(counts(&[("gpu", 2)]))).await.unwrap();

    alloc.release_all().unwrap();
    assert!(alloc.held().is_empty());
    assert_eq!(pool.available().get("gpu"), 2);
}
