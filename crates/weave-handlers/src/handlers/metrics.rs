use std::sync::Arc;

use async_trait::async_trait;
use weave_core::time::Clock;
use weave_core::{Handler, Invocation, Next, Response, Role};

use super::{METRICS_CONSUMER, METRICS_PROVIDER};
use crate::metrics::CallMetrics;

/// 记录请求数、失败数与耗时；位于链首，耗时覆盖其后全部处理器。
pub struct MetricsHandler {
    role: Role,
    store: Arc<CallMetrics>,
    clock: Arc<dyn Clock>,
}

impl MetricsHandler {
    pub fn new(role: Role, store: Arc<CallMetrics>, clock: Arc<dyn Clock>) -> Self {
        Self { role, store, clock }
    }
}

#[async_trait]
impl Handler for MetricsHandler {
    fn name(&self) -> &str {
        match self.role {
            Role::Provider => METRICS_PROVIDER,
            Role::Consumer => METRICS_CONSUMER,
        }
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        let started = self.clock.now();
        let response = next.run(inv).await;
        let elapsed = self.clock.now().saturating_duration_since(started);
        self.store.record(
            self.role,
            &inv.microservice_name,
            &inv.operation_id,
            elapsed,
            response.is_failure(),
        );
        response
    }
}
