//! # 延迟感知策略
//!
//! ## 核心意图（Why）
//! - 把流量偏向近期平均延迟最低的实例，同时保留一部分轮询流量，让慢实例恢复后仍有机会被重新采样。
//!
//! ## 逻辑解析（How）
//! - 传输步骤按 `(服务, 协议)` 与地址记录每次调用耗时，每个地址只保留最近若干个样本；
//! - 后台任务周期性地计算平均值并排序，结果以 `ArcSwap` 整体替换，请求路径只读快照；
//! - 选择时以 `bias` 的概率选最快实例，否则回退到轮询；
//! - 排名按每个候选实际会使用的协议查找，调用未声明协议时与选址后的协议解析保持一致。
//!
//! ## 风险提示（Trade-offs）
//! - 排名只在刷新时更新，刷新间隔内的延迟突变不会立即反映。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::debug;
use weave_core::discovery::ServiceInstance;
use weave_core::{CoreError, Invocation};

use super::round_robin::{RoundRobin, RoundRobinCursors};
use crate::balancer::resolve_protocol;
use super::{Strategy, no_endpoint};

/// 选择最快实例的缺省概率。
pub const DEFAULT_LATENCY_BIAS: f64 = 0.7;
/// 每个地址保留的样本数。
pub const SAMPLES_PER_ADDRESS: usize = 10;
/// 缺省刷新间隔。
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type Ranking = HashMap<String, Vec<(String, Duration)>>;

/// 调用延迟统计。
#[derive(Debug, Default)]
pub struct LatencyStats {
    samples: DashMap<String, HashMap<String, VecDeque<Duration>>>,
    ranking: ArcSwap<Ranking>,
}

fn stats_key(service: &str, protocol: &str) -> String {
    format!("{service}/{protocol}")
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次调用耗时。
    pub fn record(&self, service: &str, protocol: &str, address: &str, latency: Duration) {
        let mut entry = self
            .samples
            .entry(stats_key(service, protocol))
            .or_default();
        let window = entry.entry(address.to_owned()).or_default();
        if window.len() == SAMPLES_PER_ADDRESS {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// 重新计算平均延迟并按升序替换排名快照。
    pub fn refresh(&self) {
        let mut ranking = Ranking::new();
        for entry in self.samples.iter() {
            let mut averages: Vec<(String, Duration)> = entry
                .value()
                .iter()
                .filter(|(_, window)| !window.is_empty())
                .map(|(address, window)| {
                    let total: Duration = window.iter().sum();
                    (address.clone(), total / window.len() as u32)
                })
                .collect();
            averages.sort_by(|left, right| left.1.cmp(&right.1).then_with(|| left.0.cmp(&right.0)));
            ranking.insert(entry.key().clone(), averages);
        }
        debug!(services = ranking.len(), "latency ranking refreshed");
        self.ranking.store(Arc::new(ranking));
    }

    /// 最近一次刷新时平均延迟最低的地址。
    pub fn fastest(&self, service: &str, protocol: &str) -> Option<String> {
        self.ranking
            .load()
            .get(&stats_key(service, protocol))
            .and_then(|averages| averages.first())
            .map(|(address, _)| address.clone())
    }

    /// 启动周期性刷新任务，须在 Tokio 运行时内调用。
    pub fn spawn_refresher(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.refresh();
            }
        })
    }
}

/// 以一定概率选择最快实例、否则轮询的策略。
pub struct WeightedResponse {
    stats: Arc<LatencyStats>,
    cursors: Arc<RoundRobinCursors>,
    bias: f64,
    instances: Vec<ServiceInstance>,
    service: String,
    protocol: Option<String>,
    service_key: String,
}

impl WeightedResponse {
    pub fn new(stats: Arc<LatencyStats>, cursors: Arc<RoundRobinCursors>, bias: f64) -> Self {
        Self {
            stats,
            cursors,
            bias: bias.clamp(0.0, 1.0),
            instances: Vec::new(),
            service: String::new(),
            protocol: None,
            service_key: String::new(),
        }
    }

    fn fastest_instance(&self) -> Option<&ServiceInstance> {
        let mut fastest: HashMap<String, Option<String>> = HashMap::new();
        self.instances.iter().find(|instance| {
            let Some(protocol) = resolve_protocol(self.protocol.as_deref(), instance) else {
                return false;
            };
            let address = fastest
                .entry(protocol)
                .or_insert_with_key(|protocol| self.stats.fastest(&self.service, protocol));
            address.as_ref().is_some_and(|address| {
                instance
                    .endpoints
                    .values()
                    .any(|candidate| candidate == address)
            })
        })
    }
}

impl Strategy for WeightedResponse {
    fn receive_data(&mut self, inv: &Invocation, instances: Vec<ServiceInstance>, service_key: &str) {
        self.instances = instances;
        self.service = inv.microservice_name.clone();
        self.protocol = inv.protocol.clone();
        self.service_key = service_key.to_owned();
    }

    fn pick(&mut self) -> Result<ServiceInstance, CoreError> {
        if self.instances.is_empty() {
            return Err(no_endpoint(&self.service_key));
        }
        if rand::thread_rng().gen_bool(self.bias) {
            if let Some(instance) = self.fastest_instance() {
                return Ok(instance.clone());
            }
        }
        RoundRobin::pick_from(&self.cursors, &self.instances, &self.service_key)
    }
}

impl std::fmt::Debug for WeightedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedResponse")
            .field("bias", &self.bias)
            .field("service_key", &self.service_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> Vec<ServiceInstance> {
        vec![
            ServiceInstance::new("orders", "slow").with_endpoint("rest", "10.0.0.1:8080"),
            ServiceInstance::new("orders", "fast").with_endpoint("rest", "10.0.0.2:8080"),
        ]
    }

    #[test]
    fn ranking_orders_by_average_and_keeps_recent_samples() {
        let stats = LatencyStats::new();
        for _ in 0..SAMPLES_PER_ADDRESS {
            stats.record("orders", "rest", "10.0.0.2:8080", Duration::from_millis(500));
        }
        stats.record("orders", "rest", "10.0.0.1:8080", Duration::from_millis(100));
        assert_eq!(stats.fastest("orders", "rest"), None, "刷新前没有排名");

        stats.refresh();
        assert_eq!(stats.fastest("orders", "rest").as_deref(), Some("10.0.0.1:8080"));

        for _ in 0..SAMPLES_PER_ADDRESS {
            stats.record("orders", "rest", "10.0.0.2:8080", Duration::from_millis(10));
        }
        stats.refresh();
        assert_eq!(
            stats.fastest("orders", "rest").as_deref(),
            Some("10.0.0.2:8080"),
            "旧样本被滑出后排名更新"
        );
    }

    #[test]
    fn full_bias_always_picks_fastest_and_zero_bias_round_robins() {
        let stats = Arc::new(LatencyStats::new());
        stats.record("orders", "rest", "10.0.0.2:8080", Duration::from_millis(5));
        stats.record("orders", "rest", "10.0.0.1:8080", Duration::from_millis(50));
        stats.refresh();
        let cursors = Arc::new(RoundRobinCursors::default());
        let inv = Invocation::new("orders", "GetOrder").with_protocol("rest");

        let mut biased = WeightedResponse::new(Arc::clone(&stats), Arc::clone(&cursors), 1.0);
        biased.receive_data(&inv, instances(), "orders");
        for _ in 0..5 {
            assert_eq!(biased.pick().map(|i| i.instance_id).ok().as_deref(), Some("fast"));
        }

        let mut unbiased = WeightedResponse::new(stats, cursors, 0.0);
        unbiased.receive_data(&inv, instances(), "orders");
        let picked: Vec<String> = (0..2)
            .filter_map(|_| unbiased.pick().ok().map(|i| i.instance_id))
            .collect();
        assert_eq!(picked, vec!["slow", "fast"], "零偏置时退化为轮询");
    }

    #[test]
    fn undeclared_protocol_uses_instance_endpoint_protocol() {
        let stats = Arc::new(LatencyStats::new());
        stats.record("orders", "rest", "10.0.0.2:8080", Duration::from_millis(5));
        stats.record("orders", "rest", "10.0.0.1:8080", Duration::from_millis(50));
        stats.refresh();
        let inv = Invocation::new("orders", "GetOrder");

        let mut strategy =
            WeightedResponse::new(stats, Arc::new(RoundRobinCursors::default()), 1.0);
        strategy.receive_data(&inv, instances(), "orders");
        for _ in 0..4 {
            assert_eq!(
                strategy.pick().map(|i| i.instance_id).ok().as_deref(),
                Some("fast"),
                "未声明协议时按实例端点协议查找排名"
            );
        }
    }

    #[tokio::test]
    async fn refresher_task_publishes_ranking() {
        let stats = Arc::new(LatencyStats::new());
        stats.record("orders", "rest", "10.0.0.1:8080", Duration::from_millis(5));
        let handle = Arc::clone(&stats).spawn_refresher(Duration::from_millis(10));
        for _ in 0..50 {
            if stats.fastest("orders", "rest").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        assert_eq!(stats.fastest("orders", "rest").as_deref(), Some("10.0.0.1:8080"));
    }
}
