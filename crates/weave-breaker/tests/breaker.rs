//! 熔断仓储并发契约：唯一实例、唯一探测、降级收尾。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use weave_breaker::{BreakerRegistry, BreakerState, EventType};
use weave_core::governance::CommandConfig;
use weave_core::time::MockClock;
use weave_core::{CoreError, Response, StatusCode, codes};

fn strict() -> CommandConfig {
    CommandConfig {
        request_volume_threshold: 5,
        error_percent_threshold: 50,
        sleep_window: Duration::from_secs(10),
        ..CommandConfig::default()
    }
}

#[test]
fn concurrent_first_access_yields_one_instance() {
    let registry = Arc::new(BreakerRegistry::new(Arc::new(MockClock::new())));
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let created = Arc::clone(&created);
            thread::spawn(move || {
                let (circuit, fresh) = registry.get_circuit("Consumer.orders");
                if fresh {
                    created.fetch_add(1, Ordering::SeqCst);
                }
                Arc::as_ptr(&circuit) as usize
            })
        })
        .collect();
    let pointers: Vec<usize> = handles
        .into_iter()
        .map(|handle| handle.join().expect("线程不应 panic"))
        .collect();

    assert_eq!(created.load(Ordering::SeqCst), 1, "只创建一次");
    assert!(pointers.windows(2).all(|pair| pair[0] == pair[1]), "所有线程拿到同一实例");
}

#[test]
fn concurrent_probes_have_exactly_one_winner() {
    let clock = MockClock::new();
    let registry = Arc::new(BreakerRegistry::new(Arc::new(clock.clone())));
    registry.configure("Consumer.orders", &strict());
    let (circuit, _) = registry.get_circuit("Consumer.orders");
    for _ in 0..5 {
        circuit.report_event(&[EventType::Failure]).expect("通道未满");
    }
    assert!(circuit.is_open());
    clock.advance(Duration::from_secs(11));

    let winners = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let circuit = Arc::clone(&circuit);
            let winners = Arc::clone(&winners);
            thread::spawn(move || {
                if circuit.allow_request() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("线程不应 panic");
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1, "同一睡眠窗口只有一个探测");
    assert_eq!(circuit.state(), BreakerState::Open);
}

#[tokio::test]
async fn open_circuit_skips_run_and_uses_fallback() {
    let registry = BreakerRegistry::new(Arc::new(MockClock::new()));
    registry.configure("Consumer.orders", &strict());

    for _ in 0..5 {
        let outcome = registry
            .execute("Consumer.orders", async {
                Response::with_status(StatusCode::INTERNAL_SERVER_ERROR)
            })
            .await;
        let response = outcome.complete(None::<fn(&CoreError) -> Result<Response, CoreError>>);
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR, "无降级时透传原响应");
    }

    let executed = AtomicUsize::new(0);
    let outcome = registry
        .execute("Consumer.orders", async {
            executed.fetch_add(1, Ordering::SeqCst);
            Response::ok("unreachable")
        })
        .await;
    assert_eq!(outcome.event(), EventType::ShortCircuit);
    assert_eq!(outcome.error().map(CoreError::code), Some(codes::CIRCUIT_OPEN));

    let response = outcome.complete(Some(|_: &CoreError| Ok(Response::ok("cached"))));
    assert_eq!(executed.load(Ordering::SeqCst), 0, "短路时不执行调用");
    assert_eq!(response.payload.as_deref(), Some(&b"cached"[..]));

    let (circuit, _) = registry.get_circuit("Consumer.orders");
    assert_eq!(circuit.metrics().count(EventType::FallbackSuccess), 1);
    assert_eq!(circuit.metrics().count(EventType::ShortCircuit), 1);
}

#[tokio::test]
async fn exhausted_concurrency_rejects() {
    let registry = BreakerRegistry::new(Arc::new(MockClock::new()));
    registry.configure(
        "Consumer.inventory",
        &CommandConfig {
            max_concurrent_requests: 0,
            ..CommandConfig::default()
        },
    );
    let outcome = registry
        .execute("Consumer.inventory", async { Response::ok("never") })
        .await;
    assert_eq!(outcome.event(), EventType::Rejected);
    let response = outcome.complete(None::<fn(&CoreError) -> Result<Response, CoreError>>);
    assert_eq!(response.error_code(), Some(codes::CIRCUIT_REJECTED));
}
