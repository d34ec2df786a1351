//! # 配置控制面
//!
//! ## 核心意图（Why）
//! - 每次调用都要解析三类治理配置，读路径必须无锁且不被配置推送阻塞；
//! - 配置推送逐键到达，需要在不丢失并发推送的前提下整体替换快照。
//!
//! ## 逻辑解析（How）
//! - 读：`ArcSwap::load` 取当前 [`Snapshot`]，在其上合并角色默认与服务覆盖；
//! - 写：持有写者互斥锁，克隆当前配置、应用变更、版本号加一后整体发布。
//!
//! ## 风险提示（Trade-offs）
//! - 每次推送都克隆整份配置；推送频率远低于调用频率，以写放大换取读路径零竞争。

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use weave_core::configuration::{ChangeEvent, ConfigSource};
use weave_core::control::ControlPanel;
use weave_core::governance::{
    CommandConfig, LoadBalancingConfig, RateLimitingConfig, circuit_name,
};
use weave_core::{Invocation, Role};
use weave_ratelimit::{ConsumerKeys, LimiterMap, ProviderKeys, enabled_key};

use crate::keys::{GovernanceKey, apply_command, apply_load_balance};
use crate::settings::GovernanceSettings;

/// 某一时刻的完整配置。
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub settings: GovernanceSettings,
}

/// 一次动态变更命中的目标。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedChange {
    pub key: GovernanceKey,
    pub version: u64,
}

/// 以静态配置为底、动态推送为覆盖的控制面。
pub struct ConfigPanel {
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    source: Arc<dyn ConfigSource>,
}

impl ConfigPanel {
    pub fn new(settings: GovernanceSettings, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot {
                version: 0,
                settings,
            }),
            writer: Mutex::new(()),
            source,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn version(&self) -> u64 {
        self.snapshot.load().version
    }

    pub fn source(&self) -> &Arc<dyn ConfigSource> {
        &self.source
    }

    /// 整体替换静态配置。
    pub fn replace(&self, settings: GovernanceSettings) -> u64 {
        let _guard = self.writer.lock();
        let version = self.snapshot.load().version + 1;
        self.snapshot.store(Arc::new(Snapshot { version, settings }));
        version
    }

    /// 应用一次动态变更。
    ///
    /// # 契约说明（What）
    /// - 无法识别的键返回 `None`，不产生新版本；
    /// - 值类型不符时记录告警并返回 `None`；
    /// - 删除事件把对应字段回退到下层取值。
    pub fn apply_change(&self, event: &ChangeEvent) -> Option<AppliedChange> {
        let key = GovernanceKey::parse(&event.key)?;
        let _guard = self.writer.lock();
        let current = self.snapshot.load_full();
        let mut settings = current.settings.clone();
        let accepted = match &key {
            GovernanceKey::Command {
                role,
                service,
                field,
            } => {
                let rules = settings.command_rules_mut(*role);
                let rule = match service {
                    Some(service) => rules.services.entry(service.clone()).or_default(),
                    None => &mut rules.defaults,
                };
                apply_command(rule, *field, event.value.as_ref())
            }
            GovernanceKey::LoadBalance { service, field } => {
                let section = &mut settings.loadbalance;
                let rule = match service {
                    Some(service) => section.services.entry(service.clone()).or_default(),
                    None => &mut section.defaults,
                };
                apply_load_balance(rule, *field, event.value.as_ref())
            }
        };
        if !accepted {
            warn!(
                key = %event.key,
                value = ?event.value,
                "governance value has the wrong type, change ignored"
            );
            return None;
        }
        let version = current.version + 1;
        self.snapshot.store(Arc::new(Snapshot { version, settings }));
        debug!(key = %event.key, kind = ?event.kind, version, "governance change applied");
        Some(AppliedChange { key, version })
    }
}

impl ControlPanel for ConfigPanel {
    fn circuit_breaker(&self, inv: &Invocation, role: Role) -> (String, CommandConfig) {
        let snapshot = self.snapshot.load();
        let settings = &snapshot.settings;
        let name = circuit_name(role, settings.circuit_breaker.scope, inv);
        let config = settings
            .command_rules(role)
            .for_service(&inv.microservice_name);
        (name, config)
    }

    fn load_balancing(&self, inv: &Invocation) -> LoadBalancingConfig {
        self.snapshot
            .load()
            .settings
            .loadbalance
            .for_service(&inv.microservice_name)
    }

    fn rate_limiting(&self, inv: &Invocation, role: Role) -> RateLimitingConfig {
        let enabled = self.source.get_bool(&enabled_key(role), false);
        let keys = match role {
            Role::Consumer => ConsumerKeys::new(&inv.microservice_name, &inv.operation_id).by_priority(),
            Role::Provider => ProviderKeys::new(&inv.operation_id).by_priority(),
        };
        let (rate, key) = LimiterMap::rate_with_priority(self.source.as_ref(), &keys);
        RateLimitingConfig { enabled, key, rate }
    }
}

impl std::fmt::Debug for ConfigPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigPanel")
            .field("version", &self.version())
            .finish()
    }
}
