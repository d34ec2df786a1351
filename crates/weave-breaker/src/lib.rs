//! # weave-breaker
//!
//! 按命令隔离的熔断器：滚动健康窗口驱动 关闭 → 打开 → 单探测 → 关闭/打开 的状态机，
//! 仓储保证每个命令名至多一个实例，并提供在熔断保护下执行异步调用的入口。
//!
//! - [`metrics`]：有界通道 + 固定桶滚动窗口；
//! - [`circuit`]：单命令状态机；
//! - [`pool`]：命令级并发额度；
//! - [`registry`]：双重检查创建、配置、清除与受保护执行；
//! - [`command`]：执行结果与一次性事件上报。

pub mod circuit;
pub mod command;
pub mod metrics;
pub mod pool;
pub mod registry;

pub use circuit::{BreakerState, CircuitBreaker};
pub use command::CommandOutcome;
pub use metrics::{EventType, Metrics};
pub use pool::ExecutorPool;
pub use registry::BreakerRegistry;
