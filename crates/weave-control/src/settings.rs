//! # 静态治理配置
//!
//! ## 核心意图（Why）
//! - 以 TOML 描述运行时的全部静态治理参数，键名与动态下发的配置键保持同一套 camelCase 词汇；
//! - 规则类型（[`CommandRule`]、[`LoadBalanceRule`]）的字段全部为 `Option`，
//!   以便"角色默认 ← 服务覆盖 ← 动态推送"三层逐字段叠加。
//!
//! ## 契约说明（What）
//! - 缺失的段落与字段取缺省值，未知字段被忽略；
//! - [`GovernanceSettings::validate`] 拒绝自相矛盾的组合，例如启用边车却未给出地址。
//!
//! ## 示例
//! ```toml
//! [loadbalance]
//! strategy = "RoundRobin"
//! retryEnabled = true
//! retryOnSame = 1
//!
//! [loadbalance.services.orders]
//! strategy = "WeightedResponse"
//!
//! [circuitBreaker]
//! scope = "api"
//!
//! [circuitBreaker.consumer]
//! requestVolumeThreshold = 5
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use weave_core::governance::{
    BackoffConfig, BackoffKind, CircuitScope, CommandConfig, DEFAULT_STRATEGY, LoadBalancingConfig,
};
use weave_core::{CoreError, Role, codes};
use weave_loadbalance::{DEFAULT_REFRESH_INTERVAL, DEFAULT_RETRY_CONDITION, SidecarConfig};

use crate::routing::{RouteRule, validate_rules};

/// 缺省提供端处理链。
pub const DEFAULT_PROVIDER_CHAIN: &[&str] = &[
    "metrics-provider",
    "ratelimiter-provider",
    "access-log",
    "tracing-provider",
];

/// 缺省消费端处理链。
pub const DEFAULT_CONSUMER_CHAIN: &[&str] = &[
    "metrics-consumer",
    "ratelimiter-consumer",
    "bizkeeper-consumer",
    "router",
    "loadbalance",
    "tracing-consumer",
    "transport",
];

/// 缺省控制面名称。
pub const DEFAULT_PANEL: &str = "config";

/// 加载配置的失败路径。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings")]
    Parse(#[from] toml::de::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

impl From<SettingsError> for CoreError {
    fn from(error: SettingsError) -> Self {
        CoreError::configuration(codes::CONFIG_INVALID, error.to_string()).with_cause(error)
    }
}

/// 运行时的全部静态治理配置。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GovernanceSettings {
    pub panel: String,
    pub loadbalance: LoadBalanceSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub handler: HandlerChains,
    pub sidecar: SidecarSection,
    pub retry_condition: String,
    pub latency: LatencySection,
    pub tracing: TracingSection,
    pub access_log: AccessLogSection,
    pub route_rule: BTreeMap<String, Vec<RouteRule>>,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            panel: DEFAULT_PANEL.to_owned(),
            loadbalance: LoadBalanceSection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            handler: HandlerChains::default(),
            sidecar: SidecarSection::default(),
            retry_condition: DEFAULT_RETRY_CONDITION.to_owned(),
            latency: LatencySection::default(),
            tracing: TracingSection::default(),
            access_log: AccessLogSection::default(),
            route_rule: BTreeMap::new(),
        }
    }
}

impl GovernanceSettings {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// 读取并解析 TOML 文件。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sidecar.enabled && self.sidecar.address.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "sidecar is enabled but no address is given".to_owned(),
            ));
        }
        if self.latency.bias_percent > 100 {
            return Err(SettingsError::Invalid(format!(
                "latency bias {}% exceeds 100%",
                self.latency.bias_percent
            )));
        }
        for (role, chain) in [
            (Role::Provider, &self.handler.provider),
            (Role::Consumer, &self.handler.consumer),
        ] {
            if chain.iter().any(|name| name.trim().is_empty()) {
                return Err(SettingsError::Invalid(format!(
                    "{role} chain contains an empty handler name"
                )));
            }
        }
        for (service, rules) in &self.route_rule {
            validate_rules(service, rules).map_err(|error| SettingsError::Invalid(error.to_string()))?;
        }
        Ok(())
    }

    pub fn command_rules(&self, role: Role) -> &CommandRules {
        match role {
            Role::Provider => &self.circuit_breaker.provider,
            Role::Consumer => &self.circuit_breaker.consumer,
        }
    }

    pub fn command_rules_mut(&mut self, role: Role) -> &mut CommandRules {
        match role {
            Role::Provider => &mut self.circuit_breaker.provider,
            Role::Consumer => &mut self.circuit_breaker.consumer,
        }
    }

    pub fn chain(&self, role: Role) -> &[String] {
        match role {
            Role::Provider => &self.handler.provider,
            Role::Consumer => &self.handler.consumer,
        }
    }
}

/// 负载均衡规则；`None` 表示沿用下层取值。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalanceRule {
    pub strategy: Option<String>,
    pub filters: Option<Vec<String>>,
    pub retry_enabled: Option<bool>,
    pub retry_on_same: Option<u32>,
    pub retry_on_next: Option<u32>,
    pub backoff_kind: Option<BackoffKind>,
    pub backoff_min_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

impl LoadBalanceRule {
    /// 以 `over` 逐字段覆盖自身。
    pub fn overlay(&self, over: &LoadBalanceRule) -> LoadBalanceRule {
        LoadBalanceRule {
            strategy: over.strategy.clone().or_else(|| self.strategy.clone()),
            filters: over.filters.clone().or_else(|| self.filters.clone()),
            retry_enabled: over.retry_enabled.or(self.retry_enabled),
            retry_on_same: over.retry_on_same.or(self.retry_on_same),
            retry_on_next: over.retry_on_next.or(self.retry_on_next),
            backoff_kind: over.backoff_kind.or(self.backoff_kind),
            backoff_min_ms: over.backoff_min_ms.or(self.backoff_min_ms),
            backoff_max_ms: over.backoff_max_ms.or(self.backoff_max_ms),
        }
    }

    /// 落到具体配置，未给出的字段取 [`LoadBalancingConfig::default`]。
    pub fn resolve(&self) -> LoadBalancingConfig {
        let base = LoadBalancingConfig::default();
        LoadBalancingConfig {
            strategy: self
                .strategy
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_STRATEGY.to_owned()),
            filters: self.filters.clone().unwrap_or(base.filters),
            retry_enabled: self.retry_enabled.unwrap_or(base.retry_enabled),
            retry_on_same: self.retry_on_same.unwrap_or(base.retry_on_same),
            retry_on_next: self.retry_on_next.unwrap_or(base.retry_on_next),
            backoff: BackoffConfig {
                kind: self.backoff_kind.unwrap_or(base.backoff.kind),
                min: self
                    .backoff_min_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.backoff.min),
                max: self
                    .backoff_max_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.backoff.max),
            },
        }
    }
}

/// 负载均衡段：全局默认加按服务覆盖。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalanceSection {
    #[serde(flatten)]
    pub defaults: LoadBalanceRule,
    pub services: BTreeMap<String, LoadBalanceRule>,
}

impl LoadBalanceSection {
    pub fn for_service(&self, service: &str) -> LoadBalancingConfig {
        match self.services.get(service) {
            Some(rule) => self.defaults.overlay(rule).resolve(),
            None => self.defaults.resolve(),
        }
    }
}

/// 熔断、隔离与降级规则；`None` 表示沿用下层取值。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandRule {
    pub enabled: Option<bool>,
    pub force_open: Option<bool>,
    pub force_closed: Option<bool>,
    pub sleep_window_in_milliseconds: Option<u64>,
    pub request_volume_threshold: Option<u64>,
    pub error_threshold_percentage: Option<u32>,
    pub timeout_in_milliseconds: Option<u64>,
    pub max_concurrent_requests: Option<usize>,
    pub fallback_enabled: Option<bool>,
    pub fallback_force: Option<bool>,
    pub fallback_policy: Option<String>,
}

impl CommandRule {
    pub fn overlay(&self, over: &CommandRule) -> CommandRule {
        CommandRule {
            enabled: over.enabled.or(self.enabled),
            force_open: over.force_open.or(self.force_open),
            force_closed: over.force_closed.or(self.force_closed),
            sleep_window_in_milliseconds: over
                .sleep_window_in_milliseconds
                .or(self.sleep_window_in_milliseconds),
            request_volume_threshold: over
                .request_volume_threshold
                .or(self.request_volume_threshold),
            error_threshold_percentage: over
                .error_threshold_percentage
                .or(self.error_threshold_percentage),
            timeout_in_milliseconds: over.timeout_in_milliseconds.or(self.timeout_in_milliseconds),
            max_concurrent_requests: over.max_concurrent_requests.or(self.max_concurrent_requests),
            fallback_enabled: over.fallback_enabled.or(self.fallback_enabled),
            fallback_force: over.fallback_force.or(self.fallback_force),
            fallback_policy: over
                .fallback_policy
                .clone()
                .or_else(|| self.fallback_policy.clone()),
        }
    }

    pub fn resolve(&self) -> CommandConfig {
        let base = CommandConfig::default();
        CommandConfig {
            circuit_breaker_enabled: self.enabled.unwrap_or(base.circuit_breaker_enabled),
            force_open: self.force_open.unwrap_or(base.force_open),
            force_close: self.force_closed.unwrap_or(base.force_close),
            force_fallback: self.fallback_force.unwrap_or(base.force_fallback),
            fallback_enabled: self.fallback_enabled.unwrap_or(base.fallback_enabled),
            fallback_policy: self
                .fallback_policy
                .clone()
                .unwrap_or(base.fallback_policy),
            timeout: self
                .timeout_in_milliseconds
                .map(Duration::from_millis)
                .unwrap_or(base.timeout),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(base.max_concurrent_requests),
            request_volume_threshold: self
                .request_volume_threshold
                .unwrap_or(base.request_volume_threshold),
            sleep_window: self
                .sleep_window_in_milliseconds
                .map(Duration::from_millis)
                .unwrap_or(base.sleep_window),
            error_percent_threshold: self
                .error_threshold_percentage
                .unwrap_or(base.error_percent_threshold),
        }
    }
}

/// 某一角色的熔断规则：角色默认加按服务覆盖。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRules {
    #[serde(flatten)]
    pub defaults: CommandRule,
    pub services: BTreeMap<String, CommandRule>,
}

impl CommandRules {
    pub fn for_service(&self, service: &str) -> CommandConfig {
        match self.services.get(service) {
            Some(rule) => self.defaults.overlay(rule).resolve(),
            None => self.defaults.resolve(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub scope: CircuitScope,
    pub consumer: CommandRules,
    pub provider: CommandRules,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerChains {
    pub provider: Vec<String>,
    pub consumer: Vec<String>,
}

impl Default for HandlerChains {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER_CHAIN.iter().map(|name| (*name).to_owned()).collect(),
            consumer: DEFAULT_CONSUMER_CHAIN.iter().map(|name| (*name).to_owned()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarSection {
    pub enabled: bool,
    pub address: String,
}

impl Default for SidecarSection {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:30101".to_owned(),
        }
    }
}

impl From<&SidecarSection> for SidecarConfig {
    fn from(section: &SidecarSection) -> Self {
        SidecarConfig {
            enabled: section.enabled,
            address: section.address.clone(),
        }
    }
}

/// 延迟感知策略参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LatencySection {
    pub refresh_interval_ms: u64,
    pub bias_percent: u32,
}

impl Default for LatencySection {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
            bias_percent: 70,
        }
    }
}

impl LatencySection {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn bias(&self) -> f64 {
        f64::from(self.bias_percent.min(100)) / 100.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSection {
    pub disabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogSection {
    pub enabled: bool,
}
