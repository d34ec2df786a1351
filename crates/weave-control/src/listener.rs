//! 配置变更监听器。
//!
//! 监听器订阅配置源，把推送转换为控制面快照更新以及熔断器、限流器的重建。

use std::sync::Arc;

use tracing::{debug, info};
use weave_breaker::BreakerRegistry;
use weave_core::configuration::{ChangeEvent, ChangeKind, ConfigListener};
use weave_core::control::ControlPanel;
use weave_core::{Invocation, Role};
use weave_ratelimit::LimiterMap;
use weave_ratelimit::keys::PREFIX as FLOWCONTROL_PREFIX;

use crate::keys::{COMMAND_PREFIXES, GovernanceKey, LOADBALANCE_PREFIX};
use crate::panel::ConfigPanel;

/// 熔断、隔离与降级配置的监听器。
///
/// # 契约说明（What）
/// - 变更先写入控制面，再以新配置重设受影响的熔断器并清空其统计；
/// - 服务级键只影响 `<Role>.<服务>` 及其操作级命令；角色级键影响该角色全部命令。
pub struct CircuitBreakerListener {
    panel: Arc<ConfigPanel>,
    breakers: Arc<BreakerRegistry>,
}

impl CircuitBreakerListener {
    pub fn new(panel: Arc<ConfigPanel>, breakers: Arc<BreakerRegistry>) -> Self {
        Self { panel, breakers }
    }

    fn reconfigure(&self, role: Role, service: Option<&str>) -> usize {
        let prefix = match service {
            Some(service) => format!("{role}.{service}"),
            None => role.as_str().to_owned(),
        };
        for name in self.breakers.circuit_names() {
            if name != prefix && !name.starts_with(&format!("{prefix}.")) {
                continue;
            }
            let target = match service {
                Some(service) => service.to_owned(),
                None => match command_service(&name, role) {
                    Some(target) => target,
                    None => continue,
                },
            };
            let probe = Invocation::new(target, "");
            let (_, config) = self.panel.circuit_breaker(&probe, role);
            self.breakers.configure(&name, &config);
        }
        self.breakers.flush_matching(&prefix)
    }
}

/// 从命令名中取回服务名；命令名为 `<Role>.<服务>[.<操作>]`。
///
/// 仅用于角色级变更；含 `.` 的服务名此时按首段解析。
fn command_service(name: &str, role: Role) -> Option<String> {
    let rest = name.strip_prefix(role.as_str())?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    Some(rest.split('.').next().unwrap_or_default().to_owned())
}

impl ConfigListener for CircuitBreakerListener {
    fn prefixes(&self) -> &[&'static str] {
        COMMAND_PREFIXES
    }

    fn on_event(&self, event: &ChangeEvent) {
        let Some(applied) = self.panel.apply_change(event) else {
            return;
        };
        if let GovernanceKey::Command { role, service, .. } = applied.key {
            let flushed = self.reconfigure(role, service.as_deref());
            info!(
                key = %event.key,
                version = applied.version,
                flushed,
                "circuit breaker settings refreshed"
            );
        }
    }
}

/// 负载均衡配置的监听器。
pub struct LoadBalancingListener {
    panel: Arc<ConfigPanel>,
}

impl LoadBalancingListener {
    pub fn new(panel: Arc<ConfigPanel>) -> Self {
        Self { panel }
    }
}

impl ConfigListener for LoadBalancingListener {
    fn prefixes(&self) -> &[&'static str] {
        &[LOADBALANCE_PREFIX]
    }

    fn on_event(&self, event: &ChangeEvent) {
        if let Some(applied) = self.panel.apply_change(event) {
            debug!(key = %event.key, version = applied.version, "load balancing settings refreshed");
        }
    }
}

/// 限流速率的监听器：创建与更新重建令牌桶，删除移除令牌桶，`enabled` 开关键被忽略。
pub struct RateLimitListener {
    limiters: Arc<LimiterMap>,
}

impl RateLimitListener {
    pub fn new(limiters: Arc<LimiterMap>) -> Self {
        Self { limiters }
    }
}

const FLOWCONTROL_PREFIXES: &[&str] = &[FLOWCONTROL_PREFIX];

impl ConfigListener for RateLimitListener {
    fn prefixes(&self) -> &[&'static str] {
        FLOWCONTROL_PREFIXES
    }

    fn on_event(&self, event: &ChangeEvent) {
        if event.key.contains("enabled") {
            return;
        }
        match (event.kind, &event.value) {
            (ChangeKind::Create | ChangeKind::Update, Some(value)) => {
                self.limiters.update(&event.key, value);
            }
            (ChangeKind::Delete, _) => {
                let removed = self.limiters.delete(&event.key);
                debug!(key = %event.key, removed, "rate limiter removed");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_service_handles_both_scopes() {
        assert_eq!(command_service("Consumer.orders", Role::Consumer).as_deref(), Some("orders"));
        assert_eq!(
            command_service("Consumer.orders.GetOrder", Role::Consumer).as_deref(),
            Some("orders")
        );
        assert_eq!(command_service("Consumer", Role::Consumer).as_deref(), Some(""));
        assert_eq!(command_service("Provider.orders", Role::Consumer), None);
    }
}
