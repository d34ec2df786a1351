//! # BreakerRegistry：熔断器仓储
//!
//! ## 核心意图（Why）
//! - 每个命令名至多对应一个 [`CircuitBreaker`]，并发首次访问也不会产生重复实例；
//! - 仓储由运行时拥有并注入，测试与多实例部署之间互不影响。
//!
//! ## 逻辑解析（How）
//! - 两级加锁：仓储级读写锁只负责存在性检查、创建与删除；状态翻转由熔断器自身的锁负责；
//! - 创建采用“读锁检查 → 释放 → 写锁复查 → 创建”的双重检查；
//! - 命令配置单独保存：熔断器被清除后再次创建时仍沿用最新配置。
//!
//! ## 风险提示（Trade-offs）
//! - 清除会丢弃窗口统计，正在执行的请求持有旧实例的 `Arc`，其上报落在旧实例上。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use weave_core::governance::CommandConfig;
use weave_core::time::Clock;
use weave_core::{CoreError, Response, codes};

use crate::circuit::CircuitBreaker;
use crate::command::CommandOutcome;
use crate::metrics::{DEFAULT_CHANNEL_CAPACITY, EventType};

/// 熔断器仓储。
pub struct BreakerRegistry {
    circuits: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    settings: RwLock<HashMap<String, CommandConfig>>,
    defaults: CommandConfig,
    clock: Arc<dyn Clock>,
    channel_capacity: usize,
}

impl BreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_defaults(clock, CommandConfig::default())
    }

    /// 指定未配置命令使用的缺省配置。
    pub fn with_defaults(clock: Arc<dyn Clock>, defaults: CommandConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
            defaults,
            clock,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// 调整新建熔断器的指标通道容量。
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// 登记或更新命令配置；已存在的熔断器立即生效。
    ///
    /// 每次调用都会经过这里，配置未变时只取读锁。
    pub fn configure(&self, name: &str, settings: &CommandConfig) {
        if self.settings.read().get(name) == Some(settings) {
            return;
        }
        {
            let mut configured = self.settings.write();
            if configured.get(name) == Some(settings) {
                return;
            }
            configured.insert(name.to_owned(), settings.clone());
        }
        let existing = self.circuits.read().get(name).cloned();
        if let Some(circuit) = existing {
            circuit.update_settings(settings.clone());
        }
    }

    /// 获取命令的熔断器，不存在时创建。第二个返回值表示本次是否新建。
    pub fn get_circuit(&self, name: &str) -> (Arc<CircuitBreaker>, bool) {
        if let Some(circuit) = self.circuits.read().get(name) {
            return (Arc::clone(circuit), false);
        }

        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get(name) {
            return (Arc::clone(circuit), false);
        }
        let settings = self
            .settings
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        let circuit = Arc::new(CircuitBreaker::new(
            name,
            settings,
            Arc::clone(&self.clock),
            self.channel_capacity,
        ));
        circuits.insert(name.to_owned(), Arc::clone(&circuit));
        debug!(command = name, "circuit created");
        (circuit, true)
    }

    /// 查询命令是否打开；命令不存在时返回 `governance.circuit_not_found`。
    pub fn is_open(&self, name: &str) -> Result<bool, CoreError> {
        let circuit = self.circuits.read().get(name).cloned();
        circuit.map(|circuit| circuit.is_open()).ok_or_else(|| {
            CoreError::configuration(
                codes::CIRCUIT_NOT_FOUND,
                format!("circuit `{name}` does not exist"),
            )
        })
    }

    /// 已存在的命令名。
    pub fn circuit_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.circuits.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 清除单个熔断器。
    pub fn flush_by_name(&self, name: &str) -> bool {
        let removed = self.circuits.write().remove(name);
        if let Some(circuit) = &removed {
            circuit.metrics().reset();
            info!(command = name, "circuit flushed");
        }
        removed.is_some()
    }

    /// 清除名称等于 `prefix` 或以 `prefix.` 开头的全部熔断器，返回清除数量。
    pub fn flush_matching(&self, prefix: &str) -> usize {
        let scoped = format!("{prefix}.");
        let mut circuits = self.circuits.write();
        let doomed: Vec<String> = circuits
            .keys()
            .filter(|name| name.as_str() == prefix || name.starts_with(&scoped))
            .cloned()
            .collect();
        for name in &doomed {
            if let Some(circuit) = circuits.remove(name) {
                circuit.metrics().reset();
            }
        }
        if !doomed.is_empty() {
            info!(prefix, flushed = doomed.len(), "circuits flushed");
        }
        doomed.len()
    }

    /// 清除全部熔断器。
    pub fn flush(&self) {
        let drained: Vec<_> = self.circuits.write().drain().collect();
        for (_, circuit) in &drained {
            circuit.metrics().reset();
        }
        info!(flushed = drained.len(), "all circuits flushed");
    }

    /// 在熔断保护下执行 `run`。
    ///
    /// # 执行逻辑（How）
    /// 1. 熔断拒绝：不轮询 `run`，结果为短路；
    /// 2. 并发额度耗尽：不轮询 `run`，结果为拒绝；
    /// 3. 按命令超时执行 `run`；超时后 `run` 被丢弃，结果为超时；
    /// 4. 响应为失败（存在错误或状态 ≥ 500）时结果为失败，否则为成功。
    ///
    /// # 契约说明（What）
    /// - 事件在 [`CommandOutcome::complete`] 中统一上报，保证每次执行恰好上报一次。
    pub async fn execute<F>(&self, name: &str, run: F) -> CommandOutcome
    where
        F: Future<Output = Response>,
    {
        let (circuit, _) = self.get_circuit(name);
        if !circuit.allow_request() {
            debug!(command = name, "circuit short-circuited request");
            let error = CoreError::admission(
                codes::CIRCUIT_OPEN,
                format!("circuit `{name}` is open"),
            );
            return CommandOutcome::failed(circuit, EventType::ShortCircuit, error, None);
        }
        let Some(ticket) = circuit.pool().try_acquire() else {
            debug!(command = name, "circuit rejected request: concurrency exhausted");
            let error = CoreError::admission(
                codes::CIRCUIT_REJECTED,
                format!("circuit `{name}` has no spare concurrency"),
            );
            return CommandOutcome::failed(circuit, EventType::Rejected, error, None);
        };

        let timeout = circuit.settings().timeout;
        let result = if timeout.is_zero() {
            Some(run.await)
        } else {
            tokio::time::timeout(timeout, run).await.ok()
        };
        drop(ticket);

        match result {
            None => {
                let error = CoreError::timeout(
                    codes::CIRCUIT_TIMEOUT,
                    format!("command `{name}` timed out after {timeout:?}"),
                );
                CommandOutcome::failed(circuit, EventType::Timeout, error, None)
            }
            Some(response) if response.is_failure() => {
                let error = response.error.clone().unwrap_or_else(|| {
                    CoreError::transport(
                        codes::TRANSPORT_STATUS,
                        format!("upstream responded with status {}", response.status),
                    )
                });
                CommandOutcome::failed(circuit, EventType::Failure, error, Some(response))
            }
            Some(response) => CommandOutcome::succeeded(circuit, response),
        }
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("circuits", &self.circuit_names())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use weave_core::time::MockClock;
    use weave_core::{ErrorCategory, StatusCode};

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(Arc::new(MockClock::new()))
    }

    #[test]
    fn configure_reaches_live_and_future_circuits() {
        let registry = registry();
        let (circuit, created) = registry.get_circuit("Consumer.orders");
        assert!(created);

        let tightened = CommandConfig {
            max_concurrent_requests: 3,
            ..CommandConfig::default()
        };
        registry.configure("Consumer.orders", &tightened);
        assert_eq!(circuit.pool().max(), 3, "已存在的熔断器即时生效");

        registry.flush_by_name("Consumer.orders");
        let (recreated, created) = registry.get_circuit("Consumer.orders");
        assert!(created, "清除后重新创建");
        assert_eq!(recreated.settings().max_concurrent_requests, 3, "新实例沿用最新配置");
    }

    #[test]
    fn unchanged_config_does_not_wait_for_exclusive_access() {
        let registry = Arc::new(registry());
        let config = CommandConfig::default();
        registry.configure("Consumer.orders", &config);

        let reader = registry.settings.read();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.configure("Consumer.orders", &config);
                let _ = done_tx.send(());
            })
        };
        let finished = done_rx.recv_timeout(Duration::from_secs(2));
        drop(reader);
        worker.join().expect("线程不应 panic");
        assert!(finished.is_ok(), "配置未变时与其他读者并行通过");
    }

    #[test]
    fn prefix_flush_respects_segment_boundary() {
        let registry = registry();
        for name in ["Consumer.orders", "Consumer.orders.GetOrder", "Consumer.ordersv2", "Provider"] {
            registry.get_circuit(name);
        }
        assert_eq!(registry.flush_matching("Consumer.orders"), 2);
        assert_eq!(
            registry.circuit_names(),
            vec!["Consumer.ordersv2".to_owned(), "Provider".to_owned()]
        );

        let missing = registry.is_open("Consumer.orders").err().map(|err| err.code());
        assert_eq!(missing, Some(codes::CIRCUIT_NOT_FOUND));
        registry.flush();
        assert!(registry.circuit_names().is_empty());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let registry = registry();
        registry.configure(
            "Consumer.slow",
            &CommandConfig {
                timeout: Duration::from_millis(20),
                ..CommandConfig::default()
            },
        );
        let outcome = registry
            .execute("Consumer.slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Response::ok("late")
            })
            .await;
        assert_eq!(outcome.event(), EventType::Timeout);
        let response = outcome.complete(None::<fn(&CoreError) -> Result<Response, CoreError>>);
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.error.as_ref().map(CoreError::category),
            Some(ErrorCategory::Timeout)
        );
    }
}
