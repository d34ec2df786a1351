//! 限流配置键。
//!
//! 消费端按 `服务.操作` → `服务` 的优先级查找；提供端按 `操作` → 全局 查找。

use weave_core::Role;

/// 限流配置键前缀。
pub const PREFIX: &str = "weave.flowcontrol";

/// `weave.flowcontrol.<Role>.qps.enabled`
pub fn enabled_key(role: Role) -> String {
    format!("{PREFIX}.{role}.qps.enabled")
}

/// 消费端候选键，最具体者在前。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerKeys {
    pub service: Option<String>,
    pub operation: Option<String>,
}

impl ConsumerKeys {
    pub fn new(service: &str, operation: &str) -> Self {
        if service.is_empty() {
            return Self::default();
        }
        let service_key = format!("{PREFIX}.{}.qps.limit.{service}", Role::Consumer);
        let operation =
            (!operation.is_empty()).then(|| format!("{service_key}.{operation}"));
        Self {
            service: Some(service_key),
            operation,
        }
    }

    pub fn by_priority(&self) -> Vec<String> {
        self.operation
            .iter()
            .chain(self.service.iter())
            .cloned()
            .collect()
    }
}

/// 提供端候选键，最具体者在前。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderKeys {
    pub api: Option<String>,
    pub global: String,
}

impl ProviderKeys {
    pub fn new(operation: &str) -> Self {
        let api = (!operation.is_empty())
            .then(|| format!("{PREFIX}.{}.qps.limit.{operation}", Role::Provider));
        Self {
            api,
            global: format!("{PREFIX}.{}.qps.global.limit", Role::Provider),
        }
    }

    pub fn by_priority(&self) -> Vec<String> {
        self.api
            .iter()
            .cloned()
            .chain(std::iter::once(self.global.clone()))
            .collect()
    }
}
