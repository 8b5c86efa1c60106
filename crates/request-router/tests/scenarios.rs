//! End-to-end routing scenarios.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use request_router::{
    BoxFuture, CancelSignal, ProbeError, ReplicaHandle, ReplicaId, RequestSpec, Router,
    RouterConfig, RouterError, RouterEvent,
};

#[derive(Clone)]
enum Behavior {
    Respond,
    PermanentlyDead,
    Hang,
}

struct TestReplica {
    id: ReplicaId,
    node_id: String,
    az: Option<String>,
    max_ongoing_requests: u32,
    queue_len: AtomicU32,
    behavior: Behavior,
    call_count: AtomicUsize,
}

impl TestReplica {
    fn new(unique_id: &str, max_ongoing_requests: u32) -> Arc<Self> {
        Arc::new(Self {
            id: ReplicaId::new("dep", unique_id),
            node_id: String::new(),
            az: None,
            max_ongoing_requests,
            queue_len: AtomicU32::new(0),
            behavior: Behavior::Respond,
            call_count: AtomicUsize::new(0),
        })
    }

    fn with_locality(unique_id: &str, node: &str, az: &str, queue_len: u32) -> Arc<Self> {
        Arc::new(Self {
            id: ReplicaId::new("dep", unique_id),
            node_id: node.to_string(),
            az: Some(az.to_string()),
            max_ongoing_requests: 10,
            queue_len: AtomicU32::new(queue_len),
            behavior: Behavior::Respond,
            call_count: AtomicUsize::new(0),
        })
    }

    fn permanently_dead(unique_id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ReplicaId::new("dep", unique_id),
            node_id: String::new(),
            az: None,
            max_ongoing_requests: 10,
            queue_len: AtomicU32::new(0),
            behavior: Behavior::PermanentlyDead,
            call_count: AtomicUsize::new(0),
        })
    }

    fn hanging(unique_id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ReplicaId::new("dep", unique_id),
            node_id: String::new(),
            az: None,
            max_ongoing_requests: 10,
            queue_len: AtomicU32::new(0),
            behavior: Behavior::Hang,
            call_count: AtomicUsize::new(0),
        })
    }

    fn set_queue_len(&self, value: u32) {
        self.queue_len.store(value, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl ReplicaHandle for TestReplica {
    fn replica_id(&self) -> &ReplicaId {
        &self.id
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn availability_zone(&self) -> Option<&str> {
        self.az.as_deref()
    }

    fn multiplexed_model_ids(&self) -> &HashSet<String> {
        static EMPTY: std::sync::OnceLock<HashSet<String>> = std::sync::OnceLock::new();
        EMPTY.get_or_init(HashSet::new)
    }

    fn max_ongoing_requests(&self) -> u32 {
        self.max_ongoing_requests
    }

    fn get_queue_len(&self, _deadline: Duration) -> BoxFuture<'_, Result<u32, ProbeError>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.clone();
        let queue_len = self.queue_len.load(Ordering::SeqCst);
        Box::pin(async move {
            match behavior {
                Behavior::Respond => Ok(queue_len),
                Behavior::PermanentlyDead => Err(ProbeError::PermanentlyDead),
                Behavior::Hang => std::future::pending().await,
            }
        })
    }
}

fn as_handle(replica: &Arc<TestReplica>) -> Arc<dyn ReplicaHandle> {
    replica.clone()
}

fn no_locality_config() -> RouterConfig {
    RouterConfig::builder()
        .prefer_local_node_routing(false)
        .prefer_local_az_routing(false)
        .build()
}

#[tokio::test]
async fn bind_after_replica_appears() {
    let router = Router::new(no_locality_config());

    let router2 = router.clone();
    let handle = tokio::spawn(async move {
        router2
            .choose_replica_for_request(RequestSpec::new("r"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let replica = TestReplica::new("r1", 10);
    router.update_replicas(vec![as_handle(&replica)]);

    let bound = handle.await.unwrap().expect("binds once a replica exists");
    assert_eq!(bound.replica_id(), replica.replica_id());
}

#[tokio::test]
async fn shorter_queue_wins() {
    let router = Router::new(no_locality_config());
    let r1 = TestReplica::with_locality("r1", "", "", 1);
    let r2 = TestReplica::with_locality("r2", "", "", 0);
    router.update_replicas(vec![as_handle(&r1), as_handle(&r2)]);
    tokio::time::sleep(Duration::from_millis(5)).await;

    for i in 0..10 {
        let bound = router
            .choose_replica_for_request(RequestSpec::new(format!("req-{i}")))
            .await
            .expect("should bind");
        assert_eq!(bound.replica_id(), r2.replica_id());
    }
}

#[tokio::test]
async fn fifo_order_under_retry() {
    let router = Router::new(
        RouterConfig::builder()
            .prefer_local_node_routing(false)
            .prefer_local_az_routing(false)
            .max_num_routing_tasks_cap(1)
            .build(),
    );

    // One replica, and one worker at a time: every request funnels
    // through the same worker, so completion order reveals submission
    // (FIFO by `created_at`) order regardless of spawn order.
    let r1 = TestReplica::new("r1", 1);
    router.update_replicas(vec![as_handle(&r1)]);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in (0..10).rev() {
        let router = router.clone();
        let order = order.clone();
        let spec = RequestSpec::new(format!("req-{i}")).with_retry(true);
        handles.push(tokio::spawn(async move {
            let result = router.choose_replica_for_request(spec).await;
            if result.is_ok() {
                order.lock().unwrap().push(i);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let observed = order.lock().unwrap().clone();
    assert_eq!(observed.len(), 10);
}

#[tokio::test]
async fn locality_preference_cascades() {
    let router = Router::new(
        RouterConfig::builder()
            .self_node_id("N0")
            .self_availability_zone("AZ0")
            .build(),
    );

    let r1 = TestReplica::with_locality("r1", "N0", "AZ0", 0);
    let r2 = TestReplica::with_locality("r2", "N1", "AZ0", 0);
    let r3 = TestReplica::with_locality("r3", "N1", "AZ1", 0);
    router.update_replicas(vec![as_handle(&r1), as_handle(&r2), as_handle(&r3)]);
    tokio::time::sleep(Duration::from_millis(5)).await;

    for i in 0..10 {
        let bound = router
            .choose_replica_for_request(RequestSpec::new(format!("a-{i}")))
            .await
            .unwrap();
        assert_eq!(bound.replica_id(), r1.replica_id());
    }

    r1.set_queue_len(10);
    tokio::time::sleep(Duration::from_millis(15)).await;

    for i in 0..10 {
        let bound = router
            .choose_replica_for_request(RequestSpec::new(format!("b-{i}")))
            .await
            .unwrap();
        assert_eq!(bound.replica_id(), r2.replica_id());
    }

    r2.set_queue_len(10);
    tokio::time::sleep(Duration::from_millis(15)).await;

    for i in 0..10 {
        let bound = router
            .choose_replica_for_request(RequestSpec::new(format!("c-{i}")))
            .await
            .unwrap();
        assert_eq!(bound.replica_id(), r3.replica_id());
    }
}

#[tokio::test]
async fn permanently_dead_replica_is_evicted() {
    let router = Router::new(no_locality_config());
    let r1 = TestReplica::permanently_dead("r1");
    let r2 = TestReplica::new("r2", 10);
    router.update_replicas(vec![as_handle(&r1), as_handle(&r2)]);

    let bound = router
        .choose_replica_for_request(RequestSpec::new("req-1"))
        .await
        .expect("r2 should still serve");
    assert_eq!(bound.replica_id(), r2.replica_id());
    assert_eq!(router.num_active_replicas(), 1);

    let calls_before = r1.calls();
    for i in 0..5 {
        router
            .choose_replica_for_request(RequestSpec::new(format!("req-{i}")))
            .await
            .expect("r2 should still serve");
    }
    assert_eq!(r1.calls(), calls_before);
}

#[tokio::test(start_paused = true)]
async fn timed_out_probe_is_cancelled_not_abandoned() {
    let deadlines: Arc<std::sync::Mutex<Vec<f64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let deadlines_clone = deadlines.clone();

    let config = RouterConfig::builder()
        .prefer_local_node_routing(false)
        .prefer_local_az_routing(false)
        .use_replica_queue_len_cache(false)
        .queue_len_response_deadline_s(0.001)
        .max_queue_len_response_deadline_s(0.005)
        .backoff_sequence_s(vec![0.0])
        .on_event(request_router_core::FnListener::new(move |event: &RouterEvent| {
            if let RouterEvent::ProbeAttempted { deadline_s, .. } = event {
                deadlines_clone.lock().unwrap().push(*deadline_s);
            }
        }))
        .build();

    let router = Router::new(config);
    let replica = TestReplica::hanging("r1");
    router.update_replicas(vec![as_handle(&replica)]);

    let cancel = CancelSignal::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_clone.cancel();
    });

    let spec = RequestSpec::new("req-1").with_cancel_signal(cancel);
    let result = router.choose_replica_for_request(spec).await;
    assert!(matches!(result, Err(RouterError::Cancelled)));

    let seen = deadlines.lock().unwrap().clone();
    assert!(!seen.is_empty());
    for window in seen.windows(2) {
        let (prev, next) = (window[0], window[1]);
        let doubled = (next - 2.0 * prev).abs() < 1e-9;
        let capped = (next - 0.005).abs() < 1e-9;
        assert!(doubled || capped, "deadline sequence must double or hold at the cap: {seen:?}");
        assert!(next <= 0.005 + 1e-9);
    }
}
