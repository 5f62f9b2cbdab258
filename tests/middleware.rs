mod common;

use common::test_helpers::Counters;
use flowgate::{
    CallContext, FlowControlError, FlowControlLayer, ManualClock, RuleManager, RuleSpec,
    TrackingSleeper,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, PartialEq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

fn manager(specs: Vec<RuleSpec>) -> (Arc<RuleManager>, TrackingSleeper) {
    let sleeper = TrackingSleeper::new();
    let manager = RuleManager::builder()
        .with_clock(ManualClock::new(0))
        .with_sleeper(sleeper.clone())
        .build();
    manager.load_rules(specs);
    (Arc::new(manager), sleeper)
}

#[tokio::test]
async fn rejected_requests_never_reach_inner_service() {
    let (manager, _) = manager(vec![RuleSpec::qps("echo", 5.0)]);
    let stats = Counters::with_qps(5.0);
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();

    let mut svc = FlowControlLayer::new(manager, "echo", stats.clone()).layer(service_fn(
        move |req: u32| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(req)
            }
        },
    ));

    let err = svc.ready().await.unwrap().call(1).await.unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(err.rejection().map(|r| r.resource.as_str()), Some("echo"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    stats.set_qps(1.0);
    assert_eq!(svc.ready().await.unwrap().call(7).await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inner_errors_pass_through() {
    let (manager, _) = manager(vec![]);
    let mut svc = FlowControlLayer::new(manager, "echo", Counters::with_qps(0.0))
        .layer(service_fn(|_req: u32| async { Err::<u32, _>(TestError("boom")) }));

    let err = svc.ready().await.unwrap().call(1).await.unwrap_err();
    assert!(matches!(err, FlowControlError::Inner(TestError("boom"))));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(err.into_inner(), Some(TestError("boom")));
}

#[tokio::test]
async fn caller_extractor_selects_scoped_rules() {
    let (manager, _) = manager(vec![RuleSpec::qps("api", 1.0).with_caller("batch")]);
    let layer = FlowControlLayer::new(manager, "api", Counters::with_qps(10.0))
        .with_caller(|req: &String| CallContext::new(req.clone()));
    let mut svc = ServiceBuilder::new()
        .layer(layer)
        .service(service_fn(|req: String| async move { Ok::<_, TestError>(req) }));

    let ok = svc.ready().await.unwrap().call("interactive".to_string()).await;
    assert_eq!(ok.unwrap(), "interactive");

    let err = svc.ready().await.unwrap().call("batch".to_string()).await.unwrap_err();
    assert_eq!(err.rejection().map(|r| r.limit_app.as_str()), Some("batch"));
}

#[tokio::test]
async fn paced_requests_wait_before_reaching_inner_service() {
    let (manager, sleeper) = manager(vec![RuleSpec::qps("slow", 4.0).queueing(1_000)]);
    let mut svc = FlowControlLayer::new(manager, "slow", Counters::with_qps(0.0))
        .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req) }));

    for i in 0..3 {
        assert_eq!(svc.ready().await.unwrap().call(i).await.unwrap(), i);
    }
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(250), Duration::from_millis(500)]);
}

#[tokio::test]
async fn weight_is_charged_per_request() {
    let (manager, _) = manager(vec![RuleSpec::concurrent_threads("pool", 4.0)]);
    let stats = Counters::with_concurrency(2);
    let mut svc = FlowControlLayer::new(manager, "pool", stats)
        .with_weight(3)
        .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req) }));

    let err = svc.ready().await.unwrap().call(1).await.unwrap_err();
    assert!(err.is_rejected());
}

#[tokio::test]
async fn ready_inner_service_is_the_one_called() {
    let (manager, _) = manager(vec![RuleSpec::qps("echo", 100.0)]);
    let mut svc = FlowControlLayer::new(manager, "echo", Counters::with_qps(0.0)).layer(
        ConcurrencyLimitLayer::new(1)
            .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req) })),
    );

    for i in 0..3 {
        assert_eq!(svc.ready().await.unwrap().call(i).await.unwrap(), i);
    }
}

#[tokio::test]
async fn rejection_releases_reserved_inner_capacity() {
    let (manager, _) = manager(vec![RuleSpec::qps("echo", 1.0)]);
    let stats = Counters::with_qps(5.0);
    let mut svc = FlowControlLayer::new(manager, "echo", stats.clone()).layer(
        ConcurrencyLimitLayer::new(1)
            .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req) })),
    );

    let err = svc.ready().await.unwrap().call(1).await.unwrap_err();
    assert!(err.is_rejected());

    stats.set_qps(0.0);
    assert_eq!(svc.ready().await.unwrap().call(2).await.unwrap(), 2);
}
