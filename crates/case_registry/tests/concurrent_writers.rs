use std::collections::HashSet;

use case_registry::{CaseRegistry, Dispatcher};
use futures::future::join_all;
use serde_json::json;
use shared::domain::CollectionKey;
use storage::Storage;

async fn registry() -> CaseRegistry {
    let registry = CaseRegistry::new(Storage::in_memory());
    registry.initialize().await.expect("init");
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_captures_lose_no_updates() {
    let registry = registry().await;
    let tasks = (0..64).map(|i| {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .capture(&format!("http://case/{i}"), None)
                .await
                .expect("capture")
        })
    });
    let results = join_all(tasks).await;
    assert!(results.into_iter().all(|r| r.expect("join")));

    let queue = registry.snapshot().await.expect("snapshot").queue;
    assert_eq!(queue.len(), 64);
    let unique: HashSet<_> = queue.iter().map(|r| r.url.clone()).collect();
    assert_eq!(unique.len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_duplicate_captures_admit_exactly_one() {
    let registry = registry().await;
    let tasks = (0..32).map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.capture("http://same", None).await.expect("capture") })
    });
    let added = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().expect("join"))
        .count();
    assert_eq!(added, 1);
    assert_eq!(registry.snapshot().await.expect("snapshot").queue.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observers_never_see_a_half_applied_completion() {
    let registry = registry().await;
    for i in 0..40 {
        let url = format!("http://case/{i}");
        registry.capture(&url, None).await.expect("capture");
        registry.classify(&url, "Other").await.expect("classify");
    }

    let completer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                assert!(registry
                    .complete(&format!("http://case/{i}"))
                    .await
                    .expect("complete"));
            }
        })
    };

    let mut changes = registry.subscribe([CollectionKey::Queue, CollectionKey::History]);
    loop {
        let snapshot = registry.snapshot().await.expect("snapshot");
        assert_eq!(
            snapshot.queue.len() + snapshot.history.len(),
            40,
            "every case must be in exactly one collection"
        );
        if snapshot.history.len() == 40 {
            break;
        }
        let _ = tokio::time::timeout(std::time::Duration::from_millis(20), changes.recv()).await;
    }
    completer.await.expect("completer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_type_edits_through_dispatcher() {
    let dispatcher = Dispatcher::new(registry().await);
    let tasks = (0..20).map(|i| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch_json(json!({ "type": "ADD_CASE_TYPE", "name": format!("Type {i}") }))
                .await
                .expect("dispatch")
        })
    });
    for result in join_all(tasks).await {
        assert!(result.expect("join").is_ok());
    }
    let types = dispatcher
        .registry()
        .snapshot()
        .await
        .expect("snapshot")
        .case_types;
    assert_eq!(types.len(), 30);
}
