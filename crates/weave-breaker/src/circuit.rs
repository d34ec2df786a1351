//! # CircuitBreaker：单个命令的熔断状态机
//!
//! ## 核心意图（Why）
//! - 在下游持续失败时快速拒绝请求，给下游恢复留出时间；
//! - 恢复探测只放行单个请求，避免打开状态结束瞬间的请求洪峰。
//!
//! ## 逻辑解析（How）
//! - 打开/关闭以布尔值保存在熔断器自身的读写锁内，与注册表锁相互独立；
//! - “半开”不单独存储：打开状态下，距上次翻转或探测超过睡眠窗口时，第一个在
//!   `opened_or_last_tested` 上 CAS 成功的请求成为探测请求，其余请求继续被拒绝；
//! - 关闭 → 打开在放行前惰性判定：窗口请求量达到阈值且错误率达到阈值即翻转；
//! - 打开期间收到以成功开头的事件立即关闭并清空窗口。
//!
//! ## 契约说明（What）
//! - `force_close` 优先：总是放行；其次 `force_open`（配置或运行期开关）：总是拒绝；
//! - 同一睡眠窗口内并发探测只有一个赢家；失败的探测保持打开，且下一次探测须再等一个窗口。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tracing::{info, warn};
use weave_core::governance::CommandConfig;
use weave_core::time::Clock;
use weave_core::{CoreError, codes};

use crate::metrics::{EventType, Metrics};
use crate::pool::ExecutorPool;

/// 对外可观测的熔断状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    /// 已打开且睡眠窗口已过，下一个请求将作为探测放行。
    HalfOpen,
}

/// 单个命令的熔断器。
pub struct CircuitBreaker {
    name: String,
    settings: ArcSwap<CommandConfig>,
    open: RwLock<bool>,
    force_open: AtomicBool,
    opened_or_last_tested: AtomicU64,
    metrics: Metrics,
    pool: ExecutorPool,
    clock: Arc<dyn Clock>,
    origin: Instant,
}

impl CircuitBreaker {
    /// 创建关闭状态的熔断器。
    pub fn new(
        name: impl Into<String>,
        settings: CommandConfig,
        clock: Arc<dyn Clock>,
        channel_capacity: usize,
    ) -> Self {
        let origin = clock.now();
        let pool = ExecutorPool::new(settings.max_concurrent_requests);
        Self {
            name: name.into(),
            settings: ArcSwap::from_pointee(settings),
            open: RwLock::new(false),
            force_open: AtomicBool::new(false),
            opened_or_last_tested: AtomicU64::new(0),
            metrics: Metrics::new(Arc::clone(&clock), channel_capacity),
            pool,
            clock,
            origin,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前生效配置的快照。
    pub fn settings(&self) -> Arc<CommandConfig> {
        self.settings.load_full()
    }

    /// 原子替换配置，并同步并发额度。
    pub fn update_settings(&self, settings: CommandConfig) {
        self.pool.set_max(settings.max_concurrent_requests);
        self.settings.store(Arc::new(settings));
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn pool(&self) -> &ExecutorPool {
        &self.pool
    }

    /// 运行期强制打开开关。
    pub fn toggle_force_open(&self, toggle: bool) {
        self.force_open.store(toggle, Ordering::Release);
    }

    fn is_forced_open(&self, settings: &CommandConfig) -> bool {
        settings.force_open || self.force_open.load(Ordering::Acquire)
    }

    /// 熔断是否打开。
    ///
    /// 已关闭时在此惰性评估窗口：请求量未达阈值一律视为关闭；达到阈值且不健康时翻转为打开。
    pub fn is_open(&self) -> bool {
        let settings = self.settings.load();
        if *self.open.read() || self.is_forced_open(&settings) {
            return true;
        }
        if self.metrics.requests() < settings.request_volume_threshold {
            return false;
        }
        if !self.metrics.is_healthy(settings.error_percent_threshold) {
            self.set_open();
            return true;
        }
        false
    }

    /// 是否放行一个请求。
    pub fn allow_request(&self) -> bool {
        let settings = self.settings.load();
        if settings.force_close {
            return true;
        }
        if self.is_forced_open(&settings) {
            return false;
        }
        !self.is_open() || self.allow_single_test()
    }

    /// 打开状态下尝试成为本睡眠窗口的唯一探测请求。
    pub fn allow_single_test(&self) -> bool {
        let open = self.open.read();
        let sleep_window = duration_nanos(self.settings.load().sleep_window);
        let now = self.now_nanos();
        let last = self.opened_or_last_tested.load(Ordering::Acquire);
        if *open && now > last.saturating_add(sleep_window) {
            let won = self
                .opened_or_last_tested
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if won {
                info!(command = %self.name, "circuit allowing single probe request");
            }
            return won;
        }
        false
    }

    /// 可观测状态。
    pub fn state(&self) -> BreakerState {
        let settings = self.settings.load();
        if settings.force_close {
            return BreakerState::Closed;
        }
        if self.is_forced_open(&settings) {
            return BreakerState::Open;
        }
        if !*self.open.read() {
            return BreakerState::Closed;
        }
        let last = self.opened_or_last_tested.load(Ordering::Acquire);
        if self.now_nanos() > last.saturating_add(duration_nanos(settings.sleep_window)) {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    /// 上报一次执行的事件序列，首个事件为主事件。
    ///
    /// 打开状态下主事件为成功时立即关闭并清空窗口，随后事件照常计入。
    pub fn report_event(&self, events: &[EventType]) -> Result<(), CoreError> {
        let Some(primary) = events.first() else {
            return Err(CoreError::internal(
                codes::METRICS_DROPPED,
                "no event supplied for report",
            ));
        };
        if *primary == EventType::Success && *self.open.read() {
            self.set_close();
        }
        self.metrics.report(events)
    }

    pub(crate) fn set_open(&self) {
        let mut open = self.open.write();
        if *open {
            return;
        }
        warn!(
            command = %self.name,
            error_percent = self.metrics.error_percent(),
            "circuit opened"
        );
        self.opened_or_last_tested
            .store(self.now_nanos(), Ordering::Release);
        *open = true;
    }

    pub(crate) fn set_close(&self) {
        let mut open = self.open.write();
        if !*open {
            return;
        }
        info!(command = %self.name, "circuit closed");
        *open = false;
        self.metrics.reset();
    }

    fn now_nanos(&self) -> u64 {
        duration_nanos(self.clock.now().saturating_duration_since(self.origin))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("open", &*self.open.read())
            .field("settings", &self.settings.load())
            .finish()
    }
}
