use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weave_core::control::ControlPanel;
use weave_core::{CoreError, Handler, Invocation, Next, Response, Role, codes};
use weave_ratelimit::LimiterMap;

use super::{RATELIMITER_CONSUMER, RATELIMITER_PROVIDER};

/// 提供端不限流的探活与指标路径。
pub const EXEMPT_PATHS: &[&str] = &["/healthz", "/metrics"];

/// 令牌桶准入。
///
/// # 契约说明（What）
/// - 未启用时直接放行；
/// - 配置速率 ≤ 0 视为显式禁止，一律拒绝；
/// - 拒绝时返回 `governance.rate_limited`，状态 429，不调用下游。
pub struct RateLimitHandler {
    role: Role,
    panel: Arc<dyn ControlPanel>,
    limiters: Arc<LimiterMap>,
}

impl RateLimitHandler {
    pub fn new(role: Role, panel: Arc<dyn ControlPanel>, limiters: Arc<LimiterMap>) -> Self {
        Self {
            role,
            panel,
            limiters,
        }
    }
}

#[async_trait]
impl Handler for RateLimitHandler {
    fn name(&self) -> &str {
        match self.role {
            Role::Provider => RATELIMITER_PROVIDER,
            Role::Consumer => RATELIMITER_CONSUMER,
        }
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        if self.role == Role::Provider && EXEMPT_PATHS.contains(&inv.url_path.as_str()) {
            return next.run(inv).await;
        }
        let config = self.panel.rate_limiting(inv, self.role);
        if !config.enabled {
            return next.run(inv).await;
        }
        if config.rate <= 0 || !self.limiters.allow(&config.key, config.rate) {
            debug!(
                role = %self.role,
                service = %inv.microservice_name,
                operation = %inv.operation_id,
                key = %config.key,
                rate = config.rate,
                "request rate limited"
            );
            return Response::from_error(CoreError::admission(
                codes::RATE_LIMITED,
                format!("{}|{}", config.key, config.rate),
            ));
        }
        next.run(inv).await
    }
}
