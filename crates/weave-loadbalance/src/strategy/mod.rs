//! # 实例选择策略
//!
//! ## 核心意图（Why）
//! - 策略以名称出现在配置中，内部统一为 [`Strategy`] 抽象：先接收候选集合，再选出恰好一个实例；
//! - 策略实例每次选择时由工厂新建，跨调用共享的状态（轮询游标、延迟统计）由工厂闭包捕获。
//!
//! ## 契约说明（What）
//! - `receive_data` 之后调用 `pick`；候选为空时 `pick` 返回 `loadbalance.no_endpoint`；
//! - 内置策略：`RoundRobin`、`Random`、`WeightedResponse`。

mod latency;
mod random;
mod round_robin;

use std::sync::Arc;

use weave_core::discovery::ServiceInstance;
use weave_core::registry::FactoryRegistry;
use weave_core::{CoreError, ErrorCategory, Invocation, codes};

pub use latency::{DEFAULT_LATENCY_BIAS, DEFAULT_REFRESH_INTERVAL, LatencyStats, WeightedResponse};
pub use random::RandomStrategy;
pub use round_robin::{RoundRobin, RoundRobinCursors};

pub const ROUND_ROBIN: &str = "RoundRobin";
pub const RANDOM: &str = "Random";
pub const WEIGHTED_RESPONSE: &str = "WeightedResponse";

/// 实例选择策略。
pub trait Strategy: Send {
    /// 绑定本次选择的调用、候选实例与服务键。
    fn receive_data(&mut self, inv: &Invocation, instances: Vec<ServiceInstance>, service_key: &str);

    /// 选出一个实例。
    fn pick(&mut self) -> Result<ServiceInstance, CoreError>;
}

/// 策略工厂表。
pub type StrategyRegistry = FactoryRegistry<Box<dyn Strategy>>;

/// 创建空的策略工厂表。
pub fn strategy_registry() -> StrategyRegistry {
    FactoryRegistry::new("strategy", codes::STRATEGY_NOT_FOUND, ErrorCategory::Resolution)
}

/// 注册内置策略。
///
/// `latency_bias` 为延迟感知策略选择最快实例的概率，取值 `[0, 1]`。
pub fn install_builtin_strategies(
    registry: &StrategyRegistry,
    latency: Arc<LatencyStats>,
    latency_bias: f64,
) {
    let cursors = Arc::new(RoundRobinCursors::default());
    {
        let cursors = Arc::clone(&cursors);
        registry.install(ROUND_ROBIN, move || {
            Box::new(RoundRobin::new(Arc::clone(&cursors))) as Box<dyn Strategy>
        });
    }
    registry.install(RANDOM, || Box::new(RandomStrategy::default()) as Box<dyn Strategy>);
    registry.install(WEIGHTED_RESPONSE, move || {
        Box::new(WeightedResponse::new(
            Arc::clone(&latency),
            Arc::clone(&cursors),
            latency_bias,
        )) as Box<dyn Strategy>
    });
}

pub(crate) fn no_endpoint(service_key: &str) -> CoreError {
    CoreError::resolution(
        codes::NO_ENDPOINT,
        format!("no available instance for `{service_key}`"),
    )
}
