//! # 内置处理器
//!
//! ## 核心意图（Why）
//! - 每个治理关注点实现为一个 [`Handler`]，以名称登记到处理器注册表，链按配置中的名称列表装配；
//! - 处理器所需的全部协作者集中在 [`HandlerContext`]，由运行时构造后按值克隆进工厂闭包。
//!
//! ## 契约说明（What）
//! - 短路类处理器（限流、熔断）触发时直接返回错误响应，不调用 `next`；
//! - 路由处理器只改写调用的目标标签，之后总是调用 `next`；
//! - 其余处理器总是调用 `next`，并在下游返回后按 LIFO 顺序执行响应侧逻辑。

mod access_log;
mod bizkeeper;
mod loadbalance;
mod metrics;
mod ratelimit;
mod router;
mod trace;
mod transport;

use std::sync::Arc;

use weave_breaker::BreakerRegistry;
use weave_control::RouteRuleTable;
use weave_core::control::ControlPanel;
use weave_core::fallback::FallbackRegistry;
use weave_core::time::Clock;
use weave_core::transport::TransportRegistry;
use weave_core::{Handler, HandlerRegistry, Role};
use weave_loadbalance::{LatencyStats, LoadBalancer, RetryCondition};
use weave_ratelimit::LimiterMap;

pub use access_log::AccessLogHandler;
pub use bizkeeper::BizkeeperHandler;
pub use loadbalance::LoadBalanceHandler;
pub use metrics::MetricsHandler;
pub use ratelimit::{EXEMPT_PATHS, RateLimitHandler};
pub use router::RouterHandler;
pub use trace::{TRACE_PARENT_METADATA, TracingHandler};
pub use transport::TransportHandler;

use crate::metrics::CallMetrics;

pub const METRICS_PROVIDER: &str = "metrics-provider";
pub const METRICS_CONSUMER: &str = "metrics-consumer";
pub const RATELIMITER_PROVIDER: &str = "ratelimiter-provider";
pub const RATELIMITER_CONSUMER: &str = "ratelimiter-consumer";
pub const BIZKEEPER_CONSUMER: &str = "bizkeeper-consumer";
pub const ROUTER: &str = "router";
pub const LOADBALANCE: &str = "loadbalance";
pub const TRACING_PROVIDER: &str = "tracing-provider";
pub const TRACING_CONSUMER: &str = "tracing-consumer";
pub const ACCESS_LOG: &str = "access-log";
pub const TRANSPORT: &str = "transport";

/// 内置处理器共享的协作者。
#[derive(Clone)]
pub struct HandlerContext {
    pub panel: Arc<dyn ControlPanel>,
    pub clock: Arc<dyn Clock>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiters: Arc<LimiterMap>,
    pub fallbacks: Arc<FallbackRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub routes: Arc<RouteRuleTable>,
    pub retry_condition: RetryCondition,
    pub transports: Arc<TransportRegistry>,
    pub latency: Arc<LatencyStats>,
    pub metrics: Arc<CallMetrics>,
    pub tracing_enabled: bool,
    pub access_log_enabled: bool,
}

/// 以内置名称登记全部处理器。
pub fn install_builtin_handlers(registry: &HandlerRegistry, context: &HandlerContext) {
    for role in [Role::Provider, Role::Consumer] {
        let (metrics_name, ratelimit_name, tracing_name) = match role {
            Role::Provider => (METRICS_PROVIDER, RATELIMITER_PROVIDER, TRACING_PROVIDER),
            Role::Consumer => (METRICS_CONSUMER, RATELIMITER_CONSUMER, TRACING_CONSUMER),
        };

        let ctx = context.clone();
        registry.install(metrics_name, move || {
            Arc::new(MetricsHandler::new(
                role,
                Arc::clone(&ctx.metrics),
                Arc::clone(&ctx.clock),
            )) as Arc<dyn Handler>
        });

        let ctx = context.clone();
        registry.install(ratelimit_name, move || {
            Arc::new(RateLimitHandler::new(
                role,
                Arc::clone(&ctx.panel),
                Arc::clone(&ctx.limiters),
            )) as Arc<dyn Handler>
        });

        let enabled = context.tracing_enabled;
        registry.install(tracing_name, move || {
            Arc::new(TracingHandler::new(role, enabled)) as Arc<dyn Handler>
        });
    }

    let ctx = context.clone();
    registry.install(BIZKEEPER_CONSUMER, move || {
        Arc::new(BizkeeperHandler::new(
            Arc::clone(&ctx.panel),
            Arc::clone(&ctx.breakers),
            Arc::clone(&ctx.fallbacks),
        )) as Arc<dyn Handler>
    });

    let routes = Arc::clone(&context.routes);
    registry.install(ROUTER, move || {
        Arc::new(RouterHandler::new(Arc::clone(&routes))) as Arc<dyn Handler>
    });

    let ctx = context.clone();
    registry.install(LOADBALANCE, move || {
        Arc::new(LoadBalanceHandler::new(
            Arc::clone(&ctx.panel),
            Arc::clone(&ctx.balancer),
            ctx.retry_condition.clone(),
        )) as Arc<dyn Handler>
    });

    let ctx = context.clone();
    registry.install(ACCESS_LOG, move || {
        Arc::new(AccessLogHandler::new(
            ctx.access_log_enabled,
            Arc::clone(&ctx.clock),
        )) as Arc<dyn Handler>
    });

    let ctx = context.clone();
    registry.install(TRANSPORT, move || {
        Arc::new(TransportHandler::new(
            Arc::clone(&ctx.transports),
            Arc::clone(&ctx.latency),
            Arc::clone(&ctx.clock),
        )) as Arc<dyn Handler>
    });
}
