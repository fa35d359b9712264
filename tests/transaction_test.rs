//! Transaction boundary integration tests
//!
//! Holds SQLite's writer lock from a plain connection to exercise:
//! - Bounded lock waits surfacing as `LockTimeout`
//! - Dropped use cases rolling back instead of committing

mod common;

use std::time::Duration;

use agora::services::DomainEvent;
use agora::{AgoraError, ErrorKind};
use common::TestApp;
use rusqlite::{Connection, TransactionBehavior};

#[tokio::test]
async fn test_writer_times_out_while_lock_is_held() {
    let app = TestApp::new(Duration::from_millis(200)).await;
    let (_, owner) = app.signup("owner").await;
    let post = app.services.posts.create_post(&owner, "before").await.unwrap();

    let mut holder = Connection::open(app.db.path()).unwrap();
    let held = holder
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .unwrap();

    let err = app
        .services
        .posts
        .update_post(&owner, post.id, "during")
        .await
        .unwrap_err();
    assert!(matches!(err, AgoraError::LockTimeout(_)));
    assert_eq!(err.kind(), ErrorKind::Internal);

    // Reads keep working while the lock is held
    let stored = app.services.posts.get_post(&owner, post.id).await.unwrap();
    assert_eq!(stored.content, "before");

    held.rollback().unwrap();

    let updated = app
        .services
        .posts
        .update_post(&owner, post.id, "after")
        .await
        .unwrap();
    assert_eq!(updated.content, "after");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_use_case_never_commits() {
    let app = TestApp::new(Duration::from_secs(5)).await;
    let (_, owner) = app.signup("owner").await;
    let post = app.services.posts.create_post(&owner, "original").await.unwrap();
    let mut events = app.services.events.subscribe();

    let mut holder = Connection::open(app.db.path()).unwrap();
    let held = holder
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .unwrap();

    // The update queues behind the held lock, then its caller gives up
    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        app.services.posts.update_post(&owner, post.id, "abandoned"),
    )
    .await;
    assert!(attempt.is_err());

    held.commit().unwrap();

    // Let the abandoned unit of work reach its commit
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stored = app.services.posts.get_post(&owner, post.id).await.unwrap();
    assert_eq!(stored.content, "original");
    assert!(!matches!(events.try_recv(), Ok(DomainEvent::PostUpdated { .. })));

    // The row is not left locked
    let updated = app
        .services
        .posts
        .update_post(&owner, post.id, "edited")
        .await
        .unwrap();
    assert_eq!(updated.content, "edited");
}
