//! # 端点选择
//!
//! ## 核心意图（Why）
//! - 把"服务名 → 具体地址"这一步收敛为单个入口 [`LoadBalancer::select_endpoint`]，
//!   负载均衡处理器与重试循环只关心结果地址。
//!
//! ## 逻辑解析（How）
//! 1. 免发现调用直接以服务名为地址，启用边车时改写为边车地址并携带目标主机头；
//! 2. 否则经发现拿到候选，依次应用过滤器，交给策略选出实例；
//! 3. 协议优先取调用上已声明的，其次取实例缺省协议，最后取端点表中字典序最小者。
//!
//! ## 风险提示（Trade-offs）
//! - 每次选择都新建策略实例；跨调用状态必须放在工厂闭包捕获的共享结构里。

use std::sync::Arc;

use tracing::debug;
use weave_core::discovery::{Discovery, ServiceInstance};
use weave_core::governance::LoadBalancingConfig;
use weave_core::{CoreError, Invocation, RouteType, codes};

use crate::filter::FilterRegistry;
use crate::strategy::StrategyRegistry;

/// 边车转发时携带原目标服务名的上下文头。
pub const FORWARDED_HOST_HEADER: &str = "X-Forwarded-Host";

/// 边车路由配置。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SidecarConfig {
    pub enabled: bool,
    pub address: String,
}

/// 负载均衡器：发现、过滤、策略三段组合。
pub struct LoadBalancer {
    discovery: Arc<dyn Discovery>,
    strategies: Arc<StrategyRegistry>,
    filters: Arc<FilterRegistry>,
    sidecar: SidecarConfig,
}

impl LoadBalancer {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        strategies: Arc<StrategyRegistry>,
        filters: Arc<FilterRegistry>,
    ) -> Self {
        Self {
            discovery,
            strategies,
            filters,
            sidecar: SidecarConfig::default(),
        }
    }

    pub fn with_sidecar(mut self, sidecar: SidecarConfig) -> Self {
        self.sidecar = sidecar;
        self
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// 为调用选出目标地址，并把实际使用的策略与协议写回调用。
    pub async fn select_endpoint(
        &self,
        inv: &mut Invocation,
        config: &LoadBalancingConfig,
    ) -> Result<String, CoreError> {
        if inv.no_discovery {
            if self.sidecar.enabled {
                let target = inv.microservice_name.clone();
                inv.context.insert(FORWARDED_HOST_HEADER, target);
                inv.route_type = RouteType::Sidecar;
                return Ok(self.sidecar.address.clone());
            }
            return Ok(inv.microservice_name.clone());
        }

        let strategy_name = inv
            .strategy
            .clone()
            .unwrap_or_else(|| config.strategy.clone());
        let mut strategy = self.strategies.resolve(&strategy_name)?;
        inv.strategy = Some(strategy_name);

        let instances = self
            .discovery
            .find_instances(
                &inv.source_microservice,
                &inv.microservice_name,
                &inv.route_tags,
            )
            .await
            .map_err(|error| {
                CoreError::resolution(
                    codes::DISCOVERY_FAILED,
                    format!("discovery for `{}` failed", inv.microservice_name),
                )
                .with_cause(error)
            })?;

        let mut candidates = instances;
        for name in config.filters.iter().chain(inv.filters.iter()) {
            let filter = self.filters.resolve(name)?;
            candidates = filter.filter(inv, candidates);
        }

        let service_key = service_key(inv);
        if candidates.is_empty() {
            return Err(crate::strategy::no_endpoint(&service_key));
        }

        strategy.receive_data(inv, candidates, &service_key);
        let instance = strategy.pick()?;
        let protocol = resolve_protocol(inv.protocol.as_deref(), &instance).ok_or_else(|| {
            CoreError::resolution(
                codes::PROTOCOL_UNAVAILABLE,
                format!("instance `{}` exposes no endpoint", instance.instance_id),
            )
        })?;
        let key = match &inv.port_name {
            Some(port) => format!("{protocol}-{port}"),
            None => protocol.clone(),
        };
        let address = instance.endpoints.get(&key).cloned().ok_or_else(|| {
            CoreError::resolution(
                codes::PROTOCOL_UNAVAILABLE,
                format!(
                    "instance `{}` has no `{key}` endpoint",
                    instance.instance_id
                ),
            )
        })?;
        debug!(
            service = %inv.microservice_name,
            instance = %instance.instance_id,
            %address,
            "endpoint selected"
        );
        inv.protocol = Some(protocol);
        Ok(address)
    }
}

/// 服务名加按键排序的路由标签，区分同一服务的不同子集。
fn service_key(inv: &Invocation) -> String {
    if inv.route_tags.is_empty() {
        return inv.microservice_name.clone();
    }
    let mut tags: Vec<_> = inv.route_tags.iter().collect();
    tags.sort();
    let mut key = inv.microservice_name.clone();
    for (name, value) in tags {
        key.push('|');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

/// 调用声明的协议优先，其次实例缺省协议，最后取端点表中字典序最小者。
pub(crate) fn resolve_protocol(declared: Option<&str>, instance: &ServiceInstance) -> Option<String> {
    declared
        .map(str::to_owned)
        .or_else(|| instance.default_protocol.clone())
        .or_else(|| instance.endpoints.keys().min().cloned())
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategies", &self.strategies.names())
            .field("filters", &self.filters.names())
            .field("sidecar", &self.sidecar)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{STATUS_FILTER, filter_registry};
    use crate::strategy::{LatencyStats, ROUND_ROBIN, install_builtin_strategies, strategy_registry};
    use weave_core::discovery::{InstanceCache, InstanceStatus};

    fn balancer(cache: Arc<InstanceCache>) -> LoadBalancer {
        let strategies = strategy_registry();
        install_builtin_strategies(&strategies, Arc::new(LatencyStats::new()), 0.7);
        LoadBalancer::new(cache, Arc::new(strategies), Arc::new(filter_registry()))
    }

    fn cache() -> Arc<InstanceCache> {
        let cache = Arc::new(InstanceCache::new());
        cache.set_instances(
            "orders",
            vec![
                ServiceInstance::new("orders", "a").with_endpoint("rest", "10.0.0.1:8080"),
                ServiceInstance::new("orders", "b")
                    .with_endpoint("rest", "10.0.0.2:8080")
                    .with_status(InstanceStatus::Down),
            ],
        );
        cache
    }

    #[tokio::test]
    async fn selects_with_filters_and_records_strategy_and_protocol() {
        let balancer = balancer(cache());
        let config = LoadBalancingConfig {
            filters: vec![STATUS_FILTER.to_owned()],
            ..LoadBalancingConfig::default()
        };
        let mut inv = Invocation::new("orders", "GetOrder");
        for _ in 0..3 {
            let address = balancer.select_endpoint(&mut inv, &config).await;
            assert_eq!(address.ok().as_deref(), Some("10.0.0.1:8080"), "Down 实例被过滤");
        }
        assert_eq!(inv.strategy.as_deref(), Some(ROUND_ROBIN));
        assert_eq!(inv.protocol.as_deref(), Some("rest"));
    }

    #[tokio::test]
    async fn empty_candidates_and_unknown_strategy_fail_explicitly() {
        let balancer = balancer(cache());
        let mut missing = Invocation::new("payments", "Pay");
        let error = balancer
            .select_endpoint(&mut missing, &LoadBalancingConfig::default())
            .await
            .expect_err("无实例应失败");
        assert_eq!(error.code(), codes::NO_ENDPOINT);

        let mut inv = Invocation::new("orders", "GetOrder").with_strategy("Fancy");
        let error = balancer
            .select_endpoint(&mut inv, &LoadBalancingConfig::default())
            .await
            .expect_err("未知策略应失败");
        assert_eq!(error.code(), codes::STRATEGY_NOT_FOUND);
    }

    #[tokio::test]
    async fn sidecar_routing_rewrites_target() {
        let balancer = balancer(cache()).with_sidecar(SidecarConfig {
            enabled: true,
            address: "127.0.0.1:30101".to_owned(),
        });
        let mut inv = Invocation::new("orders", "GetOrder").with_no_discovery(true);
        let address = balancer
            .select_endpoint(&mut inv, &LoadBalancingConfig::default())
            .await;
        assert_eq!(address.ok().as_deref(), Some("127.0.0.1:30101"));
        assert_eq!(inv.route_type, RouteType::Sidecar);
        assert_eq!(inv.context.get(FORWARDED_HOST_HEADER), Some("orders"));
    }

    #[tokio::test]
    async fn missing_protocol_endpoint_is_reported() {
        let balancer = balancer(cache());
        let mut inv = Invocation::new("orders", "GetOrder").with_protocol("grpc");
        let config = LoadBalancingConfig {
            filters: vec![STATUS_FILTER.to_owned()],
            ..LoadBalancingConfig::default()
        };
        let error = balancer
            .select_endpoint(&mut inv, &config)
            .await
            .expect_err("实例未暴露 grpc");
        assert_eq!(error.code(), codes::PROTOCOL_UNAVAILABLE);
    }
}
