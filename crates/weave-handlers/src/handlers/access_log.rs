use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use weave_core::time::Clock;
use weave_core::{Handler, Invocation, Next, Response};

use super::ACCESS_LOG;

/// 调用元数据中承载请求方法的键。
pub const METHOD_METADATA: &str = "method";

/// 提供端访问日志：下游返回后记录方法、路径、状态与耗时。
pub struct AccessLogHandler {
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl AccessLogHandler {
    pub fn new(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self { enabled, clock }
    }
}

#[async_trait]
impl Handler for AccessLogHandler {
    fn name(&self) -> &str {
        ACCESS_LOG
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        if !self.enabled {
            return next.run(inv).await;
        }
        let started = self.clock.now();
        let response = next.run(inv).await;
        let elapsed = self.clock.now().saturating_duration_since(started);
        info!(
            method = inv.metadata.get(METHOD_METADATA).map(String::as_str).unwrap_or("-"),
            path = %inv.url_path,
            operation = %inv.operation_id,
            source = %inv.source_microservice,
            status = response.status.as_u16(),
            error = response.error_code().unwrap_or("-"),
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "access"
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::chain::handler_registry;
    use weave_core::time::MockClock;
    use weave_core::{ChainRegistry, Endpoint, Role, StatusCode};
    use std::time::Duration;
    use tracing_test::traced_test;

    struct Slow(MockClock);

    #[async_trait]
    impl Endpoint for Slow {
        async fn serve(&self, _inv: &mut Invocation) -> Response {
            self.0.advance(Duration::from_millis(42));
            Response::with_status(StatusCode::NOT_FOUND)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_after_downstream_unwinds() {
        let clock = MockClock::new();
        let handlers = handler_registry();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        handlers.install(ACCESS_LOG, move || {
            Arc::new(AccessLogHandler::new(true, Arc::clone(&shared))) as Arc<dyn Handler>
        });
        let chain = ChainRegistry::new()
            .build(Role::Provider, "default", &[ACCESS_LOG], &handlers)
            .expect("链可构建");

        let mut inv = Invocation::new("orders", "GetOrder").with_url_path("/orders/7");
        inv.metadata.insert(METHOD_METADATA.to_owned(), "GET".to_owned());
        let response = chain.execute_with(&mut inv, &Slow(clock)).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(logs_contain("access"));
        assert!(logs_contain("path=/orders/7"));
        assert!(logs_contain("status=404"));
        assert!(logs_contain("duration_ms=42"));
    }
}
