//! 控制面契约。
//!
//! 控制面按调用解析三类治理配置。实现必须保证读取不被配置刷新阻塞，
//! 可插拔实现以名称注册到 [`PanelRegistry`]。

use std::sync::Arc;

use crate::governance::{CommandConfig, LoadBalancingConfig, RateLimitingConfig};
use crate::registry::FactoryRegistry;
use crate::{ErrorCategory, Invocation, Role, codes};

pub trait ControlPanel: Send + Sync {
    /// 解析熔断命令名称及其配置。
    fn circuit_breaker(&self, inv: &Invocation, role: Role) -> (String, CommandConfig);

    /// 解析负载均衡配置。
    fn load_balancing(&self, inv: &Invocation) -> LoadBalancingConfig;

    /// 解析限流配置。
    fn rate_limiting(&self, inv: &Invocation, role: Role) -> RateLimitingConfig;
}

/// 控制面工厂表。
pub type PanelRegistry = FactoryRegistry<Arc<dyn ControlPanel>>;

/// 创建空的控制面工厂表。
pub fn panel_registry() -> PanelRegistry {
    FactoryRegistry::new("control panel", codes::PANEL_NOT_FOUND, ErrorCategory::Configuration)
}
