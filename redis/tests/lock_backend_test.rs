//! Integration tests for `RedisLockBackend` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Run with `cargo test -p stockguard-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code uses expect for clear failure messages

use std::sync::Arc;
use std::time::Duration;
use stockguard_core::lock::{GrantOutcome, LockBackend, ReleaseOutcome};
use stockguard_core::types::{CallChain, HolderId};
use stockguard_redis::RedisLockBackend;
use stockguard_runtime::lease_lock::LeaseLock;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(25);

/// Start a Redis container and connect a backend with a per-test prefix.
async fn setup() -> (ContainerAsync<Redis>, RedisLockBackend) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");

    let backend = RedisLockBackend::new(&format!("redis://127.0.0.1:{port}"))
        .await
        .expect("Failed to connect to redis")
        .with_key_prefix(format!("test:{}:", Uuid::new_v4()));

    (container, backend)
}

fn holder() -> HolderId {
    HolderId::new(Uuid::new_v4(), CallChain::new())
}

#[tokio::test]
#[ignore] // Requires Docker
async fn grant_reenter_and_release() {
    let (_container, backend) = setup().await;
    let owner = holder();

    let GrantOutcome::Acquired(first) = backend.try_grant("42", &owner, LEASE).await.unwrap()
    else {
        panic!("expected a fresh grant");
    };
    assert_eq!(first.hold_count, 1);

    let GrantOutcome::Reentered(second) = backend.try_grant("42", &owner, LEASE).await.unwrap()
    else {
        panic!("expected a reentrant grant");
    };
    assert_eq!(second.hold_count, 2);
    // Same server-side lease, deadline re-derived from the remaining TTL.
    let drift = chrono::TimeDelta::milliseconds(50);
    assert!(second.lease_expires_at <= first.lease_expires_at + drift);
    assert!(second.lease_expires_at >= first.lease_expires_at - drift);

    assert_eq!(
        backend.release("42", &owner).await.unwrap(),
        ReleaseOutcome::Decremented { remaining_holds: 1 }
    );
    let handle = backend.inspect("42").await.unwrap().expect("still held");
    assert_eq!(handle.holder_id, owner);
    assert_eq!(handle.hold_count, 1);

    assert_eq!(backend.release("42", &owner).await.unwrap(), ReleaseOutcome::Freed);
    assert!(backend.inspect("42").await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn other_holder_sees_busy_and_cannot_release() {
    let (_container, backend) = setup().await;
    let owner = holder();
    let intruder = holder();

    backend.try_grant("42", &owner, LEASE).await.unwrap();

    match backend.try_grant("42", &intruder, LEASE).await.unwrap() {
        GrantOutcome::Busy { holder, remaining } => {
            assert_eq!(holder, owner);
            assert!(remaining <= LEASE);
            assert!(remaining > Duration::from_secs(20));
        }
        other => panic!("expected busy, got {other:?}"),
    }

    assert_eq!(
        backend.release("42", &intruder).await.unwrap(),
        ReleaseOutcome::NotHeld
    );
    assert_eq!(backend.inspect("42").await.unwrap().unwrap().hold_count, 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lease_expires_on_the_server() {
    let (_container, backend) = setup().await;
    let owner = holder();
    let next = holder();

    backend
        .try_grant("42", &owner, Duration::from_millis(200))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(backend.inspect("42").await.unwrap().is_none());
    assert!(matches!(
        backend.try_grant("42", &next, LEASE).await.unwrap(),
        GrantOutcome::Acquired(_)
    ));
    assert_eq!(
        backend.release("42", &owner).await.unwrap(),
        ReleaseOutcome::NotHeld
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lease_lock_serializes_two_instances() {
    let (_container, backend) = setup().await;
    let backend = Arc::new(backend);

    // Two processes sharing one Redis.
    let first = LeaseLock::new(Arc::clone(&backend));
    let second = LeaseLock::new(Arc::clone(&backend));

    let token = first
        .try_acquire("42", &CallChain::new(), Duration::ZERO, LEASE)
        .await
        .unwrap();
    assert!(
        second
            .try_acquire("42", &CallChain::new(), Duration::from_millis(200), LEASE)
            .await
            .is_err()
    );

    first.release(&token).await;
    assert!(
        second
            .try_acquire("42", &CallChain::new(), Duration::from_millis(200), LEASE)
            .await
            .is_ok()
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn ping_reaches_the_server() {
    let (_container, backend) = setup().await;
    backend.ping().await.unwrap();
}
