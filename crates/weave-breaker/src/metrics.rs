//! # 滚动健康窗口
//!
//! ## 核心意图（Why）
//! - 熔断判定需要最近一段时间内的请求量与错误率，而不是进程启动以来的累计值；
//! - 上报路径绝不能阻塞调用方：事件经有界通道投递，通道满时直接丢弃并返回错误。
//!
//! ## 逻辑解析（How）
//! - 每种事件对应一个 [`RollingCounter`]：固定数量的 1 秒桶构成环形缓冲，
//!   桶的归属由注入时钟计算出的“秒序号”决定，过期桶在写入时被覆盖、在求和时被忽略；
//! - 读取前先排空通道中尚未应用的更新，查询结果因此与上报顺序一致、可确定性测试。
//!
//! ## 契约说明（What）
//! - 请求量 = 成功 + 失败 + 超时 + 拒绝 + 短路；降级事件不计入请求量；
//! - 错误率 = (失败 + 超时 + 拒绝 + 短路) / 请求量，四舍五入到整数百分比；
//! - `is_healthy(threshold)` 在错误率严格小于阈值时为真。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use weave_core::time::Clock;
use weave_core::{CoreError, codes};

/// 窗口桶数。
pub const WINDOW_BUCKETS: usize = 10;
/// 单桶时长。
pub const BUCKET_WIDTH: Duration = Duration::from_secs(1);
/// 缺省更新通道容量。
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2000;

/// 熔断事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Success,
    Failure,
    Timeout,
    Rejected,
    ShortCircuit,
    FallbackSuccess,
    FallbackFailure,
}

impl EventType {
    const ALL: [EventType; 7] = [
        EventType::Success,
        EventType::Failure,
        EventType::Timeout,
        EventType::Rejected,
        EventType::ShortCircuit,
        EventType::FallbackSuccess,
        EventType::FallbackFailure,
    ];

    fn ordinal(self) -> usize {
        match self {
            EventType::Success => 0,
            EventType::Failure => 1,
            EventType::Timeout => 2,
            EventType::Rejected => 3,
            EventType::ShortCircuit => 4,
            EventType::FallbackSuccess => 5,
            EventType::FallbackFailure => 6,
        }
    }

    /// 是否计入请求量。
    pub fn is_request(self) -> bool {
        !matches!(self, EventType::FallbackSuccess | EventType::FallbackFailure)
    }

    /// 是否计入错误量。
    pub fn is_error(self) -> bool {
        matches!(
            self,
            EventType::Failure | EventType::Timeout | EventType::Rejected | EventType::ShortCircuit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Success => "success",
            EventType::Failure => "failure",
            EventType::Timeout => "timeout",
            EventType::Rejected => "rejected",
            EventType::ShortCircuit => "short-circuit",
            EventType::FallbackSuccess => "fallback-success",
            EventType::FallbackFailure => "fallback-failure",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    tick: u64,
    count: u64,
}

/// 固定桶数的滚动计数器。
#[derive(Clone, Debug, Default)]
pub struct RollingCounter {
    buckets: [Bucket; WINDOW_BUCKETS],
}

impl RollingCounter {
    /// 在 `tick` 所属的桶上累加。
    pub fn increment(&mut self, tick: u64, amount: u64) {
        let bucket = &mut self.buckets[(tick % WINDOW_BUCKETS as u64) as usize];
        if bucket.tick != tick {
            *bucket = Bucket { tick, count: 0 };
        }
        bucket.count += amount;
    }

    /// 以 `now_tick` 为窗口右端的总和。
    pub fn sum(&self, now_tick: u64) -> u64 {
        self.buckets
            .iter()
            .filter(|bucket| {
                bucket.tick <= now_tick && now_tick - bucket.tick < WINDOW_BUCKETS as u64
            })
            .map(|bucket| bucket.count)
            .sum()
    }

    pub fn reset(&mut self) {
        self.buckets = [Bucket::default(); WINDOW_BUCKETS];
    }
}

#[derive(Debug)]
struct MetricUpdate {
    events: Vec<EventType>,
    at: Instant,
}

struct MetricState {
    receiver: mpsc::Receiver<MetricUpdate>,
    counters: [RollingCounter; 7],
}

impl MetricState {
    fn drain(&mut self, origin: Instant) {
        while let Ok(update) = self.receiver.try_recv() {
            let tick = tick_of(origin, update.at);
            for event in update.events {
                self.counters[event.ordinal()].increment(tick, 1);
            }
        }
    }
}

fn tick_of(origin: Instant, at: Instant) -> u64 {
    (at.saturating_duration_since(origin).as_nanos() / BUCKET_WIDTH.as_nanos()) as u64
}

/// 单个熔断命令的滚动指标。
pub struct Metrics {
    sender: mpsc::Sender<MetricUpdate>,
    state: Mutex<MetricState>,
    clock: Arc<dyn Clock>,
    origin: Instant,
}

impl Metrics {
    /// 以给定时钟与通道容量创建；容量为零时按 1 处理。
    pub fn new(clock: Arc<dyn Clock>, channel_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(channel_capacity.max(1));
        let origin = clock.now();
        Self {
            sender,
            state: Mutex::new(MetricState {
                receiver,
                counters: Default::default(),
            }),
            clock,
            origin,
        }
    }

    /// 非阻塞上报一组事件；通道已满时丢弃并返回 `governance.metrics_dropped`。
    pub fn report(&self, events: &[EventType]) -> Result<(), CoreError> {
        let update = MetricUpdate {
            events: events.to_vec(),
            at: self.clock.now(),
        };
        match self.sender.try_send(update) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CoreError::internal(
                codes::METRICS_DROPPED,
                "metric update channel is full, event dropped",
            )),
            Err(TrySendError::Closed(_)) => Err(CoreError::internal(
                codes::METRICS_DROPPED,
                "metric update channel is closed",
            )),
        }
    }

    /// 窗口内某事件的数量。
    pub fn count(&self, event: EventType) -> u64 {
        let now = self.now_tick();
        let mut state = self.state.lock();
        state.drain(self.origin);
        state.counters[event.ordinal()].sum(now)
    }

    /// 窗口内请求量。
    pub fn requests(&self) -> u64 {
        self.summarize().0
    }

    /// 窗口内错误百分比，无请求时为 0。
    pub fn error_percent(&self) -> u32 {
        let (requests, errors) = self.summarize();
        if requests == 0 {
            return 0;
        }
        ((errors as f64 / requests as f64) * 100.0).round() as u32
    }

    /// 错误率是否低于阈值。
    pub fn is_healthy(&self, error_percent_threshold: u32) -> bool {
        self.error_percent() < error_percent_threshold
    }

    /// 清空窗口并丢弃尚未应用的更新。
    pub fn reset(&self) {
        let mut state = self.state.lock();
        while state.receiver.try_recv().is_ok() {}
        for counter in state.counters.iter_mut() {
            counter.reset();
        }
    }

    fn summarize(&self) -> (u64, u64) {
        let now = self.now_tick();
        let mut state = self.state.lock();
        state.drain(self.origin);
        EventType::ALL
            .iter()
            .fold((0, 0), |(requests, errors), event| {
                let sum = state.counters[event.ordinal()].sum(now);
                (
                    requests + if event.is_request() { sum } else { 0 },
                    errors + if event.is_error() { sum } else { 0 },
                )
            })
    }

    fn now_tick(&self) -> u64 {
        tick_of(self.origin, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::time::MockClock;

    fn metrics(capacity: usize) -> (MockClock, Metrics) {
        let clock = MockClock::new();
        let metrics = Metrics::new(Arc::new(clock.clone()), capacity);
        (clock, metrics)
    }

    #[test]
    fn error_percent_counts_every_primary_failure_kind() {
        let (_clock, metrics) = metrics(16);
        for event in [
            EventType::Success,
            EventType::Failure,
            EventType::Timeout,
            EventType::Rejected,
            EventType::ShortCircuit,
        ] {
            metrics.report(&[event]).expect("通道未满");
        }
        metrics
            .report(&[EventType::Failure, EventType::FallbackSuccess])
            .expect("通道未满");

        assert_eq!(metrics.requests(), 6, "降级事件不计入请求量");
        assert_eq!(metrics.error_percent(), 83);
        assert!(!metrics.is_healthy(50));
        assert_eq!(metrics.count(EventType::FallbackSuccess), 1);
    }

    #[test]
    fn window_forgets_buckets_older_than_ten_seconds() {
        let (clock, metrics) = metrics(16);
        metrics.report(&[EventType::Failure]).expect("通道未满");
        clock.advance(Duration::from_secs(5));
        metrics.report(&[EventType::Success]).expect("通道未满");
        assert_eq!(metrics.requests(), 2);

        clock.advance(Duration::from_secs(6));
        assert_eq!(metrics.requests(), 1, "11 秒前的失败已滑出窗口");
        assert_eq!(metrics.error_percent(), 0);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (_clock, metrics) = metrics(2);
        metrics.report(&[EventType::Failure]).expect("通道未满");
        metrics.report(&[EventType::Failure]).expect("通道未满");
        let dropped = metrics.report(&[EventType::Failure]).expect_err("第三次上报应被丢弃");
        assert_eq!(dropped.code(), codes::METRICS_DROPPED);

        assert_eq!(metrics.requests(), 2, "被丢弃的事件不计数");
        metrics.report(&[EventType::Success]).expect("排空后通道恢复可用");
        assert_eq!(metrics.requests(), 3);
    }

    #[test]
    fn reset_discards_pending_updates() {
        let (_clock, metrics) = metrics(8);
        metrics.report(&[EventType::Failure]).expect("通道未满");
        metrics.reset();
        assert_eq!(metrics.requests(), 0);
    }
}
