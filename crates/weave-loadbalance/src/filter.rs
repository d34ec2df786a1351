//! 候选实例过滤器。
//!
//! 过滤器在策略选择之前依次作用于候选集合，按名称出现在负载均衡配置中。

use std::sync::Arc;

use weave_core::discovery::{InstanceStatus, ServiceInstance};
use weave_core::registry::FactoryRegistry;
use weave_core::{ErrorCategory, Invocation, codes};

pub const STATUS_FILTER: &str = "status";
pub const ZONE_FILTER: &str = "zone";

/// 可用区标签与调用侧声明可用区的键。
pub const ZONE_TAG: &str = "zone";

pub trait InstanceFilter: Send + Sync {
    fn filter(&self, inv: &Invocation, instances: Vec<ServiceInstance>) -> Vec<ServiceInstance>;
}

/// 过滤器工厂表。
pub type FilterRegistry = FactoryRegistry<Arc<dyn InstanceFilter>>;

/// 创建预置 `status` 与 `zone` 的过滤器工厂表。
pub fn filter_registry() -> FilterRegistry {
    let registry = FactoryRegistry::new("filter", codes::FILTER_NOT_FOUND, ErrorCategory::Resolution);
    registry.install(STATUS_FILTER, || Arc::new(StatusFilter) as Arc<dyn InstanceFilter>);
    registry.install(ZONE_FILTER, || Arc::new(ZoneFilter) as Arc<dyn InstanceFilter>);
    registry
}

/// 只保留 `Up` 状态的实例。
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusFilter;

impl InstanceFilter for StatusFilter {
    fn filter(&self, _inv: &Invocation, instances: Vec<ServiceInstance>) -> Vec<ServiceInstance> {
        instances
            .into_iter()
            .filter(|instance| instance.status == InstanceStatus::Up)
            .collect()
    }
}

/// 优先同可用区实例；调用未声明可用区或同区无实例时保留全部候选。
///
/// 调用侧可用区取自路由标签 `zone`，其次取自上下文头 `zone`。
#[derive(Clone, Copy, Debug, Default)]
pub struct ZoneFilter;

impl InstanceFilter for ZoneFilter {
    fn filter(&self, inv: &Invocation, instances: Vec<ServiceInstance>) -> Vec<ServiceInstance> {
        let zone = inv
            .route_tags
            .get(ZONE_TAG)
            .map(String::as_str)
            .or_else(|| inv.context.get(ZONE_TAG));
        let Some(zone) = zone else {
            return instances;
        };
        let local: Vec<ServiceInstance> = instances
            .iter()
            .filter(|instance| instance.tags.get(ZONE_TAG).map(String::as_str) == Some(zone))
            .cloned()
            .collect();
        if local.is_empty() { instances } else { local }
    }
}
