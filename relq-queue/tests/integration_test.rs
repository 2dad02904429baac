//! Integration tests for relq-queue

use parking_lot::Mutex;
use relq_queue::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn transport(store: &Arc<MemoryListStore>, created_at: i64) -> Arc<TransportQueue> {
    Arc::new(
        TransportQueue::with_created_at(store.clone(), TransportConfig::new("orders"), created_at)
            .unwrap(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_crashed_consumer_work_is_recovered_by_another() {
    let store = Arc::new(MemoryListStore::new());
    let now = chrono::Utc::now().timestamp();

    // First consumer claims two items and dies without acknowledging.
    let crashed = transport(&store, now - 7200);
    crashed.push("a").await.unwrap();
    crashed.push("b").await.unwrap();
    crashed.push("c").await.unwrap();
    assert_eq!(crashed.pop(1).await.unwrap().value, "a");
    assert_eq!(crashed.pop(1).await.unwrap().value, "b");
    drop(crashed);

    let survivor = transport(&store, now);
    let report = survivor.recover(600).await.unwrap();
    assert_eq!(report.lists_drained, 1);
    assert_eq!(report.items_moved, 2);

    let mut seen = Vec::new();
    while let Ok(claim) = survivor.pop(1).await {
        survivor.acknowledge_claim(&claim).await.unwrap();
        seen.push(claim.value);
    }
    seen.sort();
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(store.keys(), Vec::<String>::new());
}

#[tokio::test]
async fn test_live_consumer_is_not_robbed_by_age_filtered_recovery() {
    let store = Arc::new(MemoryListStore::new());
    let now = chrono::Utc::now().timestamp();

    let live = transport(&store, now);
    live.push("mine").await.unwrap();
    let claim = live.pop(1).await.unwrap();

    let other = transport(&store, now + 1);
    let report = other.recover(3600).await.unwrap();
    assert_eq!(report.skipped_young, 1);
    assert_eq!(report.items_moved, 0);

    live.acknowledge_claim(&claim).await.unwrap();
    assert_eq!(live.stats().await.unwrap(), QueueStats::default());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    total_cents: u64,
}

#[tokio::test]
async fn test_failed_items_are_redelivered_after_recovery() {
    let store = Arc::new(MemoryListStore::new());
    let transport = transport(&store, chrono::Utc::now().timestamp());
    let dispatcher = Arc::new(Dispatcher::new(transport.clone(), 2));

    let attempts = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(Mutex::new(Vec::new()));
    {
        let (attempts, processed) = (attempts.clone(), processed.clone());
        dispatcher
            .register_json("order", move |order: Order| {
                let (attempts, processed) = (attempts.clone(), processed.clone());
                async move {
                    // First delivery of every order fails.
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        return false;
                    }
                    processed.lock().push(order.id);
                    true
                }
            })
            .unwrap();
    }

    for id in [1, 2] {
        dispatcher
            .push_json("order", &Order { id, total_cents: 995 })
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let handle = {
        let (dispatcher, cancel) = (dispatcher.clone(), cancel.clone());
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    wait_until(|| attempts.load(Ordering::SeqCst) == 2).await;
    dispatcher.wait_idle().await;
    assert_eq!(transport.stats().await.unwrap().in_flight, 2);

    transport.recover(0).await.unwrap();
    wait_until(|| processed.lock().len() == 2).await;
    dispatcher.wait_idle().await;

    cancel.cancel();
    handle.await.unwrap();

    let mut ids = processed.lock().clone();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(transport.stats().await.unwrap(), QueueStats::default());
}

#[tokio::test]
async fn test_dead_letter_items_leave_circulation() {
    let store = Arc::new(MemoryListStore::new());
    let transport = transport(&store, chrono::Utc::now().timestamp());
    let dispatcher = Arc::new(Dispatcher::with_config(
        transport.clone(),
        DispatcherConfig::new(1).with_reject_policy(RejectPolicy::DeadLetter),
    ));

    transport.push("legacy payload").await.unwrap();
    dispatcher.push("retired", "x").await.unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let (dispatcher, cancel) = (dispatcher.clone(), cancel.clone());
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };
    wait_until(|| store.list("orders:dead").len() == 2).await;
    dispatcher.wait_idle().await;
    cancel.cancel();
    handle.await.unwrap();

    // Nothing left for recovery to re-circulate.
    let report = transport.recover(0).await.unwrap();
    assert_eq!(report.items_moved, 0);
    assert_eq!(
        transport.stats().await.unwrap(),
        QueueStats {
            pending: 0,
            in_flight: 0,
            dead_letter: 2,
        }
    );
}

#[tokio::test]
async fn test_two_dispatchers_share_one_queue() {
    let store = Arc::new(MemoryListStore::new());
    let now = chrono::Utc::now().timestamp();
    let handled = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    let mut dispatchers = Vec::new();
    for offset in 0..2 {
        let dispatcher = Arc::new(Dispatcher::new(transport(&store, now + offset), 3));
        let handled = handled.clone();
        dispatcher
            .register_fn("n", move |payload: String| {
                let handled = handled.clone();
                async move {
                    handled.lock().push(payload);
                    true
                }
            })
            .unwrap();

        let (d, c) = (dispatcher.clone(), cancel.clone());
        handles.push(tokio::spawn(async move { d.run(c).await }));
        dispatchers.push(dispatcher);
    }

    for i in 0..20 {
        dispatchers[0].push("n", i).await.unwrap();
    }

    wait_until(|| handled.lock().len() == 20).await;
    for dispatcher in &dispatchers {
        dispatcher.wait_idle().await;
    }
    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen: Vec<u32> = handled.lock().iter().map(|p| p.parse().unwrap()).collect();
    seen.sort();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    assert!(store.keys().is_empty());
}
