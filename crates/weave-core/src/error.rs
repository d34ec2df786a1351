//! 稳定错误域。
//!
//! 错误码遵循 `<域>.<语义>` 约定，分类 [`ErrorCategory`] 决定调用链如何处置：
//! 准入类错误不重试、解析类错误立即失败、传输类错误交由重试策略判定。

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// 稳定错误码集合。
pub mod codes {
    /// 限流拒绝。
    pub const RATE_LIMITED: &str = "governance.rate_limited";
    /// 熔断器处于打开状态，请求被短路。
    pub const CIRCUIT_OPEN: &str = "governance.circuit_open";
    /// 熔断命令的并发额度耗尽。
    pub const CIRCUIT_REJECTED: &str = "governance.circuit_rejected";
    /// 受熔断保护的调用超时。
    pub const CIRCUIT_TIMEOUT: &str = "governance.circuit_timeout";
    /// 熔断命令不存在。
    pub const CIRCUIT_NOT_FOUND: &str = "governance.circuit_not_found";
    /// 指标更新通道已满，事件被丢弃。
    pub const METRICS_DROPPED: &str = "governance.metrics_dropped";
    /// 未注册的降级策略。
    pub const FALLBACK_NOT_FOUND: &str = "governance.fallback_not_found";
    /// 没有可用的实例或端点。
    pub const NO_ENDPOINT: &str = "loadbalance.no_endpoint";
    /// 未注册的负载均衡策略。
    pub const STRATEGY_NOT_FOUND: &str = "loadbalance.strategy_not_found";
    /// 未注册的实例过滤器。
    pub const FILTER_NOT_FOUND: &str = "loadbalance.filter_not_found";
    /// 实例未暴露所需协议的地址。
    pub const PROTOCOL_UNAVAILABLE: &str = "loadbalance.protocol_unavailable";
    /// 服务发现失败。
    pub const DISCOVERY_FAILED: &str = "discovery.failed";
    /// 未注册的服务注册器。
    pub const REGISTRATOR_NOT_FOUND: &str = "discovery.registrator_not_found";
    /// 传输层超时。
    pub const TRANSPORT_TIMEOUT: &str = "transport.timeout";
    /// 传输层连接失败。
    pub const TRANSPORT_CONNECTION: &str = "transport.connection";
    /// 对端返回非成功状态。
    pub const TRANSPORT_STATUS: &str = "transport.status";
    /// 未注册的传输协议。
    pub const TRANSPORT_NOT_FOUND: &str = "transport.protocol_not_found";
    /// 请求体读取失败。
    pub const BODY_UNAVAILABLE: &str = "transport.body_unavailable";
    /// 未注册的处理器。
    pub const HANDLER_NOT_FOUND: &str = "chain.handler_not_found";
    /// 未构建的调用链。
    pub const CHAIN_NOT_FOUND: &str = "chain.not_found";
    /// 未注册的控制面。
    pub const PANEL_NOT_FOUND: &str = "control.panel_not_found";
    /// 配置内容非法。
    pub const CONFIG_INVALID: &str = "control.config_invalid";
    /// 处理器执行期间发生 panic。
    pub const RUNTIME_PANIC: &str = "runtime.panic";
}

/// 错误的处置分类。
///
/// # 教案式注释
/// - **意图 (Why)**：调用链需要在不解析错误码字符串的前提下区分“本地拒绝”与“下游失败”；
/// - **契约 (What)**：
///   - `Admission`：限流、熔断等本地准入拒绝，永不重试；
///   - `Resolution`：无端点、无策略、协议缺失，属于静态配置问题，立即失败；
///   - `Transport` / `Timeout`：下游失败，可按重试条件重放；
///   - `Configuration` / `Internal`：配置或运行时缺陷。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Admission,
    Resolution,
    Transport,
    Timeout,
    Configuration,
    Internal,
}

impl ErrorCategory {
    /// 返回分类的稳定标签。
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Admission => "admission",
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Internal => "internal",
        }
    }
}

type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// `CoreError` 是所有治理组件共享的错误形态。
///
/// # 设计背景（Why）
/// - 处理器在短路时需要把错误写入 [`Response`](crate::Response)，同一错误还可能被熔断器
///   与降级策略再次读取，因此错误必须可廉价克隆；
/// - 稳定错误码让日志与告警可以精确聚合。
///
/// # 契约说明（What）
/// - `code`：遵循 [`codes`] 的稳定字符串；
/// - `message`：面向排障人员的描述；
/// - `category`：驱动重试与状态码映射；
/// - `cause`：可选底层原因，通过 [`Error::source`] 暴露。
///
/// # 风险提示（Trade-offs）
/// - 底层原因以 `Arc` 共享，克隆不会复制原因本身。
#[derive(Clone)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 以指定分类构造错误。
    pub fn new(
        code: &'static str,
        category: ErrorCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            cause: None,
        }
    }

    /// 构造准入类错误（限流、熔断）。
    pub fn admission(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Admission, message)
    }

    /// 构造解析类错误。
    pub fn resolution(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Resolution, message)
    }

    /// 构造传输类错误。
    pub fn transport(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Transport, message)
    }

    /// 构造超时错误。
    pub fn timeout(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Timeout, message)
    }

    /// 构造配置错误。
    pub fn configuration(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Configuration, message)
    }

    /// 构造内部错误。
    pub fn internal(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, ErrorCategory::Internal, message)
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取处置分类。
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 是否为准入拒绝（限流或熔断）。
    pub fn is_admission(&self) -> bool {
        self.category == ErrorCategory::Admission
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreError")
            .field("code", &self.code)
            .field("category", &self.category)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|cause| cause.to_string()))
            .finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("connection refused")
        }
    }

    impl Error for Refused {}

    #[test]
    fn display_renders_code_and_message() {
        let err = CoreError::admission(codes::RATE_LIMITED, "orders|2");
        assert_eq!(err.to_string(), "[governance.rate_limited] orders|2");
        assert!(err.is_admission(), "限流属于准入拒绝");
    }

    #[test]
    fn cause_survives_clone() {
        let err = CoreError::transport(codes::TRANSPORT_CONNECTION, "dial failed").with_cause(Refused);
        let cloned = err.clone();
        let source = cloned.source().map(|cause| cause.to_string());
        assert_eq!(source.as_deref(), Some("connection refused"));
        assert_eq!(cloned.category(), ErrorCategory::Transport);
    }
}
