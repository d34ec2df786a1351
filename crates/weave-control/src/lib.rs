//! # weave-control
//!
//! ## 核心意图（Why）
//! - 把静态 TOML 配置与动态推送合并为每次调用可直接使用的治理配置；
//! - 配置推送同步到熔断器仓储与限流器表，使运行中的治理状态与配置保持一致。
//!
//! ## 模块速览
//! - [`settings`]：`GovernanceSettings` 及其分层规则；
//! - [`keys`]：动态键语法；
//! - [`panel`]：基于版本化快照的 [`ConfigPanel`]；
//! - [`listener`]：三类配置变更监听器；
//! - [`routing`]：按来源与请求头分流到标签子集的路由规则。

pub mod keys;
pub mod listener;
pub mod panel;
pub mod routing;
pub mod settings;

use std::sync::Arc;

use weave_breaker::BreakerRegistry;
use weave_core::configuration::ConfigSource;
use weave_core::control::{ControlPanel, PanelRegistry};
use weave_ratelimit::LimiterMap;

pub use listener::{CircuitBreakerListener, LoadBalancingListener, RateLimitListener};
pub use panel::{ConfigPanel, Snapshot};
pub use routing::{
    ROUTE_RULE_PREFIX, RouteRule, RouteRuleError, RouteRuleListener, RouteRuleTable, RouteTag,
    RuleMatch,
};
pub use settings::{
    DEFAULT_CONSUMER_CHAIN, DEFAULT_PANEL, DEFAULT_PROVIDER_CHAIN, GovernanceSettings,
    SettingsError,
};

/// 以 [`DEFAULT_PANEL`] 之名登记配置控制面，返回是否覆盖了已有登记。
pub fn install_config_panel(registry: &PanelRegistry, panel: Arc<ConfigPanel>) -> bool {
    registry.install(DEFAULT_PANEL, move || Arc::clone(&panel) as Arc<dyn ControlPanel>)
}

/// 向配置源订阅熔断、负载均衡、限流与路由规则监听器。
pub fn subscribe_listeners(
    source: &dyn ConfigSource,
    panel: &Arc<ConfigPanel>,
    breakers: &Arc<BreakerRegistry>,
    limiters: &Arc<LimiterMap>,
    routes: &Arc<RouteRuleTable>,
) {
    source.subscribe(Arc::new(CircuitBreakerListener::new(
        Arc::clone(panel),
        Arc::clone(breakers),
    )));
    source.subscribe(Arc::new(LoadBalancingListener::new(Arc::clone(panel))));
    source.subscribe(Arc::new(RateLimitListener::new(Arc::clone(limiters))));
    source.subscribe(Arc::new(RouteRuleListener::new(Arc::clone(routes))));
}
