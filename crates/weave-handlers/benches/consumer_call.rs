use std::sync::Arc;

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use weave_control::GovernanceSettings;
use weave_core::discovery::ServiceInstance;
use weave_core::transport::Transport;
use weave_core::{CoreError, Invocation, Response};
use weave_handlers::Runtime;

struct Loopback;

#[async_trait]
impl Transport for Loopback {
    async fn call(&self, _endpoint: &str, _inv: &mut Invocation) -> Result<Response, CoreError> {
        Ok(Response::ok("pong"))
    }
}

/// 缺省消费端链的完整一跳：计量、限流判定、熔断、轮询选址、追踪与传输桩。
fn bench_default_consumer_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio 运行时可创建");
    let runtime = Runtime::builder(GovernanceSettings::default())
        .with_transport("rest", Arc::new(Loopback))
        .build()
        .expect("缺省配置可装配");
    runtime.instance_cache().set_instances(
        "orders",
        (0..4)
            .map(|i| {
                ServiceInstance::new("orders", format!("orders-{i}"))
                    .with_endpoint("rest", format!("10.0.0.{i}:8080"))
            })
            .collect(),
    );

    c.bench_function("runtime.call default consumer chain", |b| {
        b.to_async(&rt).iter(|| async {
            let mut inv = Invocation::new("orders", "GetOrder");
            runtime.call(&mut inv).await
        })
    });
}

criterion_group!(consumer_benches, bench_default_consumer_chain);
criterion_main!(consumer_benches);
