//! 可注入时钟。
//!
//! 熔断的滚动窗口、探测间隔与令牌桶补充都只通过 [`Clock::now`] 读取时间，
//! 测试注入 [`MockClock`] 手动推进，避免依赖真实睡眠。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 单调时间来源。
///
/// # 接口约束（What）
/// - `now` 必须单调不减；
/// - 推荐以 `Arc<dyn Clock>` 在组件间共享。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// 系统单调时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的虚拟时钟。
///
/// 克隆体共享同一时间线，测试可以把一个副本注入组件、用另一个副本推进时间。
#[derive(Clone, Debug)]
pub struct MockClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// 推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed = elapsed.saturating_add(delta);
    }

    /// 自构造起累计的虚拟时间。
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_timeline() {
        let clock = MockClock::new();
        let injected: Arc<dyn Clock> = Arc::new(clock.clone());
        let before = injected.now();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(injected.now() - before, Duration::from_millis(1500), "推进对所有副本可见");
    }
}
