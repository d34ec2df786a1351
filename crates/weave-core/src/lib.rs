//! # weave-core
//!
//! ## 核心意图（Why）
//! - 为调用链、熔断、限流、负载均衡与控制面提供统一的数据模型与契约，
//!   使各治理组件可以独立演进、按名称装配；
//! - 所有注册表均为显式拥有的对象，由运行时上下文注入，不依赖进程级全局状态。
//!
//! ## 模块地图（What）
//! - [`invocation`] / [`response`] / [`status`]：一次 RPC 的输入、输出与状态码；
//! - [`chain`]：`Handler` 契约、基于游标的 `Next` 续接与链注册表；
//! - [`registry`]：按名称解析的工厂注册表（处理器、策略、控制面、注册器共用）；
//! - [`discovery`] / [`transport`] / [`fallback`] / [`control`] / [`configuration`]：外部协作者接口；
//! - [`governance`]：熔断、负载均衡、限流的已解析配置模型；
//! - [`time`]：可注入时钟，保证时间相关逻辑可确定性测试；
//! - [`error`]：稳定错误码与分类。

pub mod chain;
pub mod configuration;
pub mod control;
pub mod discovery;
pub mod error;
pub mod fallback;
pub mod governance;
pub mod invocation;
pub mod registry;
pub mod response;
pub mod status;
pub mod time;
pub mod transport;

pub use chain::{Chain, ChainRegistry, Endpoint, Handler, HandlerFactory, HandlerRegistry, Next};
pub use error::{CoreError, ErrorCategory, codes};
pub use invocation::{Body, Invocation, InvocationContext, Role, RouteType};
pub use response::Response;
pub use status::StatusCode;
