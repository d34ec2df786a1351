//! 重试退避。

use std::time::Duration;

use rand::Rng;
use weave_core::governance::{BackoffConfig, BackoffKind};

/// 第 `attempt` 次重试（从 0 计）之前的等待时长。
///
/// - `Zero`：不等待；
/// - `Constant`：固定等待 `min`；
/// - `Jittered`：以 `min × 2^attempt` 为基准、封顶于 `max`，在 `[基准/2, 基准]` 内随机。
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match self.config.kind {
            BackoffKind::Zero => Duration::ZERO,
            BackoffKind::Constant => self.config.min,
            BackoffKind::Jittered => {
                let ceiling = self.config.max.max(self.config.min);
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                let base = self
                    .config
                    .min
                    .checked_mul(factor)
                    .unwrap_or(ceiling)
                    .min(ceiling);
                let half = base / 2;
                let spread = (base - half).as_nanos() as u64;
                if spread == 0 {
                    return base;
                }
                half + Duration::from_nanos(rand::thread_rng().gen_range(0..=spread))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn constant_and_zero_are_fixed() {
        let constant = Backoff::new(BackoffConfig {
            kind: BackoffKind::Constant,
            min: Duration::from_millis(20),
            max: Duration::from_secs(1),
        });
        assert_eq!(constant.delay(7), Duration::from_millis(20));
        assert_eq!(Backoff::new(BackoffConfig::default()).delay(3), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_half_base_and_ceiling(
            min_ms in 1u64..200,
            max_ms in 1u64..5_000,
            attempt in 0u32..40,
        ) {
            let config = BackoffConfig {
                kind: BackoffKind::Jittered,
                min: Duration::from_millis(min_ms),
                max: Duration::from_millis(max_ms),
            };
            let ceiling = config.max.max(config.min);
            let delay = Backoff::new(config).delay(attempt);
            prop_assert!(delay <= ceiling);
            let base = config.min.checked_mul(1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX))
                .unwrap_or(ceiling)
                .min(ceiling);
            prop_assert!(delay >= base / 2);
        }
    }
}
