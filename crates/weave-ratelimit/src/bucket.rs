//! 令牌桶。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use weave_core::time::Clock;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 以每秒 `rate` 个令牌补充、容量等于 `rate` 的令牌桶。
///
/// # 契约说明（What）
/// - 创建时桶是满的：同一瞬间最多放行 `rate` 个请求；
/// - [`try_acquire`](Self::try_acquire) 只检测不等待，无令牌立即返回 `false`；
/// - 补充按注入时钟的流逝时间线性计算，封顶于容量。
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// `rate` 须为正数。
    pub fn new(rate: u64, clock: Arc<dyn Clock>) -> Self {
        let rate = rate.max(1) as f64;
        let now = clock.now();
        Self {
            rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: now,
            }),
            clock,
        }
    }

    /// 每秒令牌数。
    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// 尝试取走一个令牌。
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
            state.last_refill = now;
        }
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("tokens", &self.state.lock().tokens)
            .finish()
    }
}
