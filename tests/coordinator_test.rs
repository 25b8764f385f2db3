//! Singleflight coordinator integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use common::StubResolver;
use nova_stream::cache::CacheStore;
use nova_stream::coordinator::{Coordinator, CoordinatorSettings};
use nova_stream::locks::LockRegistry;
use nova_stream::resolver::{Resolution, ResolveError};
use nova_stream::Error;

fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        max_calls_per_minute: 0,
        ..CoordinatorSettings::default()
    }
}

fn coordinator_with(
    resolver: StubResolver,
    locks: LockRegistry,
    settings: CoordinatorSettings,
) -> (Arc<Coordinator>, Arc<StubResolver>) {
    let resolver = Arc::new(resolver);
    let coordinator = Coordinator::new(
        resolver.clone(),
        Arc::new(CacheStore::default()),
        locks,
        settings,
    );
    (Arc::new(coordinator), resolver)
}

#[tokio::test]
async fn test_concurrent_resolves_call_resolver_once() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::ok("https://media.example/a?expire=4102444800")
            .with_delay(Duration::from_millis(100)),
        LockRegistry::default(),
        settings(),
    );

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.resolve("song").await })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().unwrap());
    }

    assert_eq!(resolver.calls(), 1);
    assert!(results.iter().all(|r| r == &results[0]));
    assert_eq!(results[0].url, "https://media.example/a?expire=4102444800");
    assert_eq!(coordinator.locks().len(), 0);
}

#[tokio::test]
async fn test_concurrent_failures_share_one_call() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::failing(ResolveError::NotFound).with_delay(Duration::from_millis(50)),
        LockRegistry::default(),
        settings(),
    );

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.resolve("X").await })
        })
        .collect();

    for task in tasks {
        assert_matches!(task.await.unwrap(), Err(Error::ResolverEmpty { .. }));
    }
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_negative_cache_expires() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::failing(ResolveError::NoPlayableFormat),
        LockRegistry::default(),
        CoordinatorSettings {
            empty_ttl: Duration::from_millis(150),
            ..settings()
        },
    );

    assert_matches!(coordinator.resolve("X").await, Err(Error::ResolverEmpty { .. }));
    assert_matches!(coordinator.resolve("X").await, Err(Error::ResolverEmpty { .. }));
    assert_eq!(resolver.calls(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_matches!(coordinator.resolve("X").await, Err(Error::ResolverEmpty { .. }));
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_unavailable_uses_shorter_ttl() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::failing(ResolveError::Upstream("HTTP Error 429".into())),
        LockRegistry::default(),
        CoordinatorSettings {
            empty_ttl: Duration::from_secs(300),
            unavailable_ttl: Duration::from_millis(100),
            ..settings()
        },
    );

    assert_matches!(
        coordinator.resolve("busy").await,
        Err(Error::ResolverUnavailable { .. })
    );
    // While the tombstone is live the failure is replayed as empty.
    assert_matches!(
        coordinator.resolve("busy").await,
        Err(Error::ResolverEmpty { reason, .. }) if reason == "upstream error: HTTP Error 429"
    );
    assert_eq!(resolver.calls(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_matches!(
        coordinator.resolve("busy").await,
        Err(Error::ResolverUnavailable { .. })
    );
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_fresh_entry_is_stable() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::scripted(|id, call| {
            Ok(Resolution::new(
                format!("https://media.example/{}?n={}", id, call),
                "audio/webm",
            ))
        }),
        LockRegistry::default(),
        settings(),
    );

    let first = coordinator.resolve("stable").await.unwrap();
    for _ in 0..5 {
        assert_eq!(coordinator.resolve("stable").await.unwrap().url, first.url);
    }
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_expired_entry_is_never_returned() {
    let (coordinator, resolver) = coordinator_with(
        StubResolver::scripted(|id, call| {
            Ok(Resolution::new(format!("https://media.example/{}?n={}", id, call), "audio/mp4")
                .with_expiry_hint(Utc::now() + chrono::Duration::milliseconds(150)))
        }),
        LockRegistry::default(),
        settings(),
    );

    let first = coordinator.resolve("short").await.unwrap();
    assert!(first.expires_at > Utc::now());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(coordinator.cached("short").is_none());

    let second = coordinator.resolve("short").await.unwrap();
    assert_ne!(first.url, second.url);
    assert!(second.expires_at > Utc::now());
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_result_after_reclamation_is_discarded() {
    let locks = LockRegistry::new(Duration::from_millis(50), 100);
    let (coordinator, resolver) = coordinator_with(
        StubResolver::ok("https://media.example/slow").with_delay(Duration::from_millis(500)),
        locks.clone(),
        settings(),
    );

    let stuck = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.resolve("slow").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(locks.sweep(), 1);
    assert_eq!(locks.len(), 0);

    assert_matches!(stuck.await.unwrap(), Err(Error::LockTimeout(_)));
    assert!(coordinator.cached("slow").is_none());
    assert_eq!(coordinator.cache().sizes().failures, 0);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_lock_timeout_is_not_cached() {
    let locks = LockRegistry::new(Duration::from_secs(60), 100);
    let (coordinator, resolver) = coordinator_with(
        StubResolver::ok("https://media.example/a").with_delay(Duration::from_millis(300)),
        locks,
        CoordinatorSettings {
            lock_timeout: Duration::from_millis(50),
            ..settings()
        },
    );

    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.resolve("a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_matches!(coordinator.resolve("a").await, Err(Error::LockTimeout(_)));
    assert!(first.await.unwrap().is_ok());
    assert!(coordinator.resolve("a").await.is_ok());
    assert_eq!(resolver.calls(), 1);
}
