//! # 已解析的治理配置
//!
//! 控制面按调用解析出的配置形态。字段均为最终值（已合并角色默认与服务级覆盖），
//! 处理器只读取、不再做回退。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Invocation, Role};

/// 负载均衡缺省策略。
pub const DEFAULT_STRATEGY: &str = "RoundRobin";

/// 熔断命令的粒度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitScope {
    /// `<角色>.<服务>`
    #[default]
    Service,
    /// `<角色>.<服务>.<操作>`
    Api,
}

/// 计算熔断命令名称。
///
/// 服务名为空时退化为角色名；`Api` 粒度追加操作名（若存在）。
pub fn circuit_name(role: Role, scope: CircuitScope, inv: &Invocation) -> String {
    let mut name = String::from(role.as_str());
    if inv.microservice_name.is_empty() {
        return name;
    }
    name.push('.');
    name.push_str(&inv.microservice_name);
    if scope == CircuitScope::Api && !inv.operation_id.is_empty() {
        name.push('.');
        name.push_str(&inv.operation_id);
    }
    name
}

/// 单个熔断命令的配置。
///
/// # 契约说明（What）
/// - `request_volume_threshold`：滚动窗口内请求数达到该值才评估错误率；
/// - `error_percent_threshold`：错误率达到该百分比即打开熔断；
/// - `sleep_window`：打开后允许单个探测请求的间隔；
/// - `timeout` 为零表示不限时；
/// - `force_close` 优先于 `force_open`。
#[derive(Clone, Debug, PartialEq)]
pub struct CommandConfig {
    pub circuit_breaker_enabled: bool,
    pub force_open: bool,
    pub force_close: bool,
    pub force_fallback: bool,
    pub fallback_enabled: bool,
    pub fallback_policy: String,
    pub timeout: Duration,
    pub max_concurrent_requests: usize,
    pub request_volume_threshold: u64,
    pub sleep_window: Duration,
    pub error_percent_threshold: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_enabled: true,
            force_open: false,
            force_close: false,
            force_fallback: false,
            fallback_enabled: false,
            fallback_policy: crate::fallback::THROW_EXCEPTION.to_owned(),
            timeout: Duration::from_secs(30),
            max_concurrent_requests: 1000,
            request_volume_threshold: 20,
            sleep_window: Duration::from_secs(15),
            error_percent_threshold: 50,
        }
    }
}

/// 重试退避方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Zero,
    Constant,
    Jittered,
}

impl BackoffKind {
    pub fn parse(raw: &str) -> Option<BackoffKind> {
        match raw.to_ascii_lowercase().as_str() {
            "zero" => Some(BackoffKind::Zero),
            "constant" => Some(BackoffKind::Constant),
            "jittered" => Some(BackoffKind::Jittered),
            _ => None,
        }
    }
}

/// 退避参数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackoffConfig {
    pub kind: BackoffKind,
    pub min: Duration,
    pub max: Duration,
}

/// 负载均衡配置。
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBalancingConfig {
    pub strategy: String,
    pub filters: Vec<String>,
    pub retry_enabled: bool,
    pub retry_on_same: u32,
    pub retry_on_next: u32,
    pub backoff: BackoffConfig,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: DEFAULT_STRATEGY.to_owned(),
            filters: Vec::new(),
            retry_enabled: false,
            retry_on_same: 0,
            retry_on_next: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

impl LoadBalancingConfig {
    /// 最大尝试次数：`(retry_on_same + 1) × (retry_on_next + 1)`，未启用重试时为 1。
    pub fn max_attempts(&self) -> u32 {
        if !self.retry_enabled {
            return 1;
        }
        self.retry_on_same
            .saturating_add(1)
            .saturating_mul(self.retry_on_next.saturating_add(1))
    }
}

/// 限流配置：`rate` 为每秒令牌数，`key` 为命中的配置键。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub key: String,
    pub rate: i64,
}
