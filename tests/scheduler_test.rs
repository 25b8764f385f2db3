//! Scheduler integration tests: prioritised background resolution.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubResolver;
use nova_stream::cache::CacheStore;
use nova_stream::coordinator::{Coordinator, CoordinatorSettings};
use nova_stream::locks::LockRegistry;
use nova_stream::resolver::Resolution;
use nova_stream::scheduler::{Priority, PriorityScheduler};
use parking_lot::Mutex;

fn coordinator(resolver: Arc<StubResolver>) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        resolver,
        Arc::new(CacheStore::default()),
        LockRegistry::default(),
        CoordinatorSettings {
            max_calls_per_minute: 0,
            ..CoordinatorSettings::default()
        },
    ))
}

async fn drain(scheduler: &PriorityScheduler, expected: u64) {
    for _ in 0..200 {
        let stats = scheduler.stats();
        if stats.completed + stats.failed >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("scheduler did not drain {} tasks", expected);
}

#[tokio::test]
async fn test_resolutions_run_in_priority_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let resolver = Arc::new(StubResolver::scripted(move |id, _| {
        seen.lock().push(id.to_string());
        Ok(Resolution::new(format!("https://media.example/{}", id), "audio/mp4"))
    }));
    let coordinator = coordinator(resolver.clone());
    let scheduler = PriorityScheduler::new(1, 100);

    for (priority, id) in [
        (Priority::Background, "bg"),
        (Priority::PlaybackCritical, "play"),
        (Priority::Ambient, "amb"),
        (Priority::Interactive, "search"),
        (Priority::PlaybackCritical, "play2"),
    ] {
        let coordinator = Arc::clone(&coordinator);
        scheduler
            .submit(priority, id, async move {
                coordinator.resolve(id).await?;
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();
    }

    scheduler.start();
    drain(&scheduler, 5).await;

    assert_eq!(*order.lock(), vec!["play", "play2", "search", "amb", "bg"]);
    assert_eq!(resolver.calls(), 5);
    assert!(coordinator.cached("bg").is_some());
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_prefetches_resolve_once() {
    let resolver = Arc::new(
        StubResolver::ok("https://media.example/same").with_delay(Duration::from_millis(50)),
    );
    let coordinator = coordinator(resolver.clone());
    let scheduler = PriorityScheduler::new(4, 100);
    scheduler.start();

    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        scheduler
            .submit(Priority::Background, "same", async move {
                coordinator.resolve("same").await?;
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();
    }

    drain(&scheduler, 8).await;

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 8);
    assert_eq!(stats.submitted[&Priority::Background], 8);
    assert_eq!(resolver.calls(), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_failed_resolutions_counted() {
    let resolver = Arc::new(StubResolver::failing(
        nova_stream::resolver::ResolveError::NotFound,
    ));
    let coordinator = coordinator(resolver);
    let scheduler = PriorityScheduler::new(2, 100);
    scheduler.start();

    for id in ["x1", "x2", "x3"] {
        let coordinator = Arc::clone(&coordinator);
        scheduler
            .submit(Priority::Ambient, id, async move {
                coordinator.resolve(id).await?;
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();
    }

    drain(&scheduler, 3).await;

    let stats = scheduler.stats();
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.completed, 0);
    assert!(stats.running);
    scheduler.shutdown().await;
    assert!(!scheduler.stats().running);
}
