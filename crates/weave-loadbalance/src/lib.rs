//! # weave-loadbalance
//!
//! 端点选择与重试原语：
//! - [`strategy`]：按名称注册的实例选择策略；
//! - [`filter`]：策略之前作用于候选集合的过滤器；
//! - [`LoadBalancer`]：发现、过滤、策略三段组合，含边车路由；
//! - [`RetryCondition`] 与 [`Backoff`]：重试循环使用的判定与等待。

pub mod backoff;
pub mod balancer;
pub mod filter;
pub mod retry;
pub mod strategy;

pub use backoff::Backoff;
pub use balancer::{FORWARDED_HOST_HEADER, LoadBalancer, SidecarConfig};
pub use filter::{FilterRegistry, InstanceFilter, filter_registry};
pub use retry::{DEFAULT_RETRY_CONDITION, RetryCondition};
pub use strategy::{
    DEFAULT_REFRESH_INTERVAL, LatencyStats, Strategy, StrategyRegistry, install_builtin_strategies, strategy_registry,
};
