//! End-to-end sync passes against an in-memory remote.

use std::sync::Arc;
use std::time::Duration;
use tillsync_store::{EntityKind, Record, RecordStore, StoreConfig};
use tillsync_sync::{
    ApiError, MemoryRemote, OrchestratorConfig, RetryConfig, SyncEvent, SyncOrchestrator,
    SyncReport, SyncStatus,
};

fn fast_retry() -> RetryConfig {
    RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(40))
}

fn orchestrator(remote: MemoryRemote, purge: bool) -> SyncOrchestrator<MemoryRemote> {
    SyncOrchestrator::new(
        RecordStore::new(StoreConfig::in_memory("till")),
        Arc::new(remote),
        OrchestratorConfig::default()
            .with_retry(fast_retry())
            .with_purge_synced(purge),
    )
}

fn customer(id: &str, email: &str) -> Record {
    Record::new(id)
        .with_field("name", "Ada")
        .with_field("email", email)
}

#[tokio::test(start_paused = true)]
async fn offline_writes_reach_the_remote() {
    let sync = orchestrator(MemoryRemote::new(), true);
    sync.create(EntityKind::Customer, &customer("c1", "ada@example.com"))
        .await
        .unwrap();
    sync.update(
        EntityKind::Customer,
        &customer("c1", "ada@example.com").with_field("loyalty_points", 10),
    )
    .await
    .unwrap();
    sync.create(EntityKind::Product, &Record::new("p1").with_field("sku", "A"))
        .await
        .unwrap();
    sync.delete(EntityKind::Product, "p1").await.unwrap();

    let report = sync.sync_once().await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            synced: 4,
            errors: 0,
            deferred: 0,
            reconciled: 0,
            purged: 4,
        }
    );

    assert_eq!(sync.queue().get_stats().await.unwrap().total, 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_absorbed_by_retry() {
    let remote = MemoryRemote::new();
    remote.fail_next(2, ApiError::timeout("slow network"));
    let sync = orchestrator(remote, false);
    sync.create(EntityKind::Sale, &Record::new("s1").with_field("total_cents", 300))
        .await
        .unwrap();

    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(sync.queue().get_stats().await.unwrap().synced, 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_failures_count_against_the_entry() {
    let remote = MemoryRemote::new();
    remote.fail_next(1, ApiError::http(422, "invalid sale"));
    let sync = orchestrator(remote, true);
    let id = sync
        .create(EntityKind::Sale, &Record::new("s1"))
        .await
        .unwrap();

    let report = sync.sync_once().await.unwrap();
    assert_eq!((report.synced, report.errors), (0, 1));

    let op = sync.queue().get(&id).await.unwrap().unwrap();
    assert_eq!(op.status, SyncStatus::Pending);
    assert_eq!(op.retries, 1);
    assert_eq!(op.error.as_deref(), Some("HTTP 422: invalid sale"));

    // The next pass succeeds and the entry is purged.
    let report = sync.sync_once().await.unwrap();
    assert_eq!((report.synced, report.purged), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn server_ids_are_reconciled() {
    let sync = orchestrator(MemoryRemote::assigning_ids(), true);
    let mut events = sync.queue().subscribe();

    sync.create(EntityKind::Customer, &customer("tmp-1", "ada@example.com"))
        .await
        .unwrap();
    sync.update(
        EntityKind::Customer,
        &customer("tmp-1", "ada@example.com").with_field("phone", "555-0100"),
    )
    .await
    .unwrap();

    let report = sync.sync_once().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.reconciled, 1);

    let store = sync.store();
    assert!(store
        .get(EntityKind::Customer, "tmp-1")
        .await
        .unwrap()
        .is_none());
    let local = store
        .get(EntityKind::Customer, "srv-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.field("email"), Some(&serde_json::json!("ada@example.com")));

    let mut reconciled = None;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Reconciled { server_id, .. } = event {
            reconciled = Some(server_id);
        }
    }
    assert_eq!(reconciled.as_deref(), Some("srv-1"));
}
