//! # weave-telemetry
//!
//! ## 核心意图（Why）
//! - 进程只需调用一次 [`install`] 即可获得结构化日志输出，其余 crate 只依赖 `tracing` 宏；
//! - [`TraceContext`] 负责 W3C `traceparent` 的解析与生成，供调用链上的追踪处理器跨进程传递。
//!
//! ## 契约说明（What）
//! - `install` 在进程内只能成功一次，重复调用返回 [`TelemetryError::AlreadyInstalled`]；
//! - 外部已设置全局订阅器时返回 [`TelemetryError::SubscriberAlreadySet`]，不会覆盖。

mod subscriber;
mod trace;

pub use subscriber::{TelemetryConfig, TelemetryError, install};
pub use trace::{TRACEPARENT, TraceContext};
