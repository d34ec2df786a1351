//! 名称到工厂的注册表。
//!
//! 处理器、负载均衡策略、控制面与服务注册器都以字符串名称出现在配置中，
//! 但内部只通过静态 trait 抽象交互。[`FactoryRegistry`] 把这条边界收敛到一处：
//! 配置驱动的查找使用字符串，查找结果是强类型的实例。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{CoreError, ErrorCategory};

/// 无参工厂。
pub type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// 按名称解析的工厂注册表。
///
/// # 教案式注释
/// - **意图 (Why)**：取代进程级全局 map，注册表由运行时拥有并注入，测试之间互不干扰；
/// - **契约 (What)**：
///   - `install` 覆盖同名工厂并返回是否发生覆盖；
///   - `resolve` 对未知名称返回携带 `not_found_code` 的显式错误；
/// - **风险 (Trade-offs)**：工厂在读锁内被调用，工厂本身不得回调同一注册表的写操作。
pub struct FactoryRegistry<T> {
    kind: &'static str,
    not_found_code: &'static str,
    not_found_category: ErrorCategory,
    factories: RwLock<BTreeMap<String, Factory<T>>>,
}

impl<T> FactoryRegistry<T> {
    /// 创建空注册表。`kind` 仅用于错误描述，例如 `"handler"`。
    pub fn new(
        kind: &'static str,
        not_found_code: &'static str,
        not_found_category: ErrorCategory,
    ) -> Self {
        Self {
            kind,
            not_found_code,
            not_found_category,
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    /// 注册工厂。
    pub fn install<F>(&self, name: impl Into<String>, factory: F) -> bool
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.into(), Arc::new(factory))
            .is_some()
    }

    /// 以名称构造实例。
    pub fn resolve(&self, name: &str) -> Result<T, CoreError> {
        let factory = self.factories.read().get(name).cloned();
        match factory {
            Some(factory) => Ok(factory()),
            None => Err(CoreError::new(
                self.not_found_code,
                self.not_found_category,
                format!("{} `{}` is not registered", self.kind, name),
            )),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// 已注册名称，按字典序排列。
    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl<T> fmt::Debug for FactoryRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn unknown_name_yields_explicit_not_found() {
        let registry: FactoryRegistry<u32> =
            FactoryRegistry::new("strategy", codes::STRATEGY_NOT_FOUND, ErrorCategory::Resolution);
        assert!(!registry.install("fixed", || 7));
        assert_eq!(registry.resolve("fixed").ok(), Some(7));

        let err = registry.resolve("missing").expect_err("未注册名称必须报错");
        assert_eq!(err.code(), codes::STRATEGY_NOT_FOUND);
        assert_eq!(err.message(), "strategy `missing` is not registered");
    }

    #[test]
    fn install_reports_replacement() {
        let registry: FactoryRegistry<&'static str> =
            FactoryRegistry::new("panel", codes::PANEL_NOT_FOUND, ErrorCategory::Configuration);
        assert!(!registry.install("config", || "v1"));
        assert!(registry.install("config", || "v2"), "同名注册应报告覆盖");
        assert_eq!(registry.resolve("config").ok(), Some("v2"));
        assert_eq!(registry.names(), vec!["config".to_owned()]);
    }
}
