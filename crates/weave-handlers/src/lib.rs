//! # weave-handlers
//!
//! ## 核心意图（Why）
//! - 提供计量、限流、熔断、路由、负载均衡与重试、追踪、访问日志、传输等内置处理器；
//! - 以 [`Runtime`] 拥有全部注册表并按配置装配两种角色的处理器链。
//!
//! ## 使用方式（What）
//! ```ignore
//! let runtime = Runtime::builder(GovernanceSettings::default())
//!     .with_transport("rest", Arc::new(MyTransport))
//!     .build()?;
//! let response = runtime.call(&mut Invocation::new("orders", "GetOrder")).await;
//! ```

pub mod handlers;
pub mod metrics;
pub mod runtime;

pub use handlers::{
    ACCESS_LOG, AccessLogHandler, BIZKEEPER_CONSUMER, BizkeeperHandler, EXEMPT_PATHS,
    HandlerContext, LOADBALANCE, LoadBalanceHandler, METRICS_CONSUMER, METRICS_PROVIDER,
    MetricsHandler, RATELIMITER_CONSUMER, RATELIMITER_PROVIDER, ROUTER, RateLimitHandler,
    RouterHandler, TRACE_PARENT_METADATA, TRACING_CONSUMER, TRACING_PROVIDER, TRANSPORT,
    TracingHandler, TransportHandler, install_builtin_handlers,
};
pub use metrics::{CallMetrics, CallSnapshot};
pub use runtime::{DEFAULT_CHAIN, MEMORY_REGISTRATOR, Runtime, RuntimeBuilder};
