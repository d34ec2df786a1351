//! # LimiterMap：按键缓存的限流器
//!
//! ## 核心意图（Why）
//! - 每个限流键惰性创建一个令牌桶，后续调用只做非阻塞检测；
//! - 配置推送的速率变化通过重建令牌桶生效，删除配置即移除。
//!
//! ## 逻辑解析（How）
//! - 与熔断仓储同构的两级加锁：map 级读写锁只负责查找与创建，桶自身的互斥锁负责令牌扣减；
//! - 创建走“读锁检查 → 写锁复查”，并发首次访问不会产生重复的桶。
//!
//! ## 契约说明（What）
//! - `rate < 1` 视为未配置，使用 [`DEFAULT_RATE`]（等效不限流）；
//! - 同一键在无配置变化时始终复用同一个桶。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use weave_core::configuration::{ConfigSource, ConfigValue};
use weave_core::time::Clock;

use crate::bucket::TokenBucket;

/// 未配置速率时的缺省值。
pub const DEFAULT_RATE: i64 = i32::MAX as i64;

/// 键到令牌桶的映射。
pub struct LimiterMap {
    limiters: RwLock<HashMap<String, Arc<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl LimiterMap {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// 检测 `key` 是否还有令牌；首次访问以 `rate` 创建令牌桶。
    pub fn allow(&self, key: &str, rate: i64) -> bool {
        self.limiter(key, rate).try_acquire()
    }

    /// 获取或创建 `key` 的令牌桶。
    pub fn limiter(&self, key: &str, rate: i64) -> Arc<TokenBucket> {
        if let Some(bucket) = self.limiters.read().get(key) {
            return Arc::clone(bucket);
        }
        let mut limiters = self.limiters.write();
        if let Some(bucket) = limiters.get(key) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(self.bucket(rate));
        limiters.insert(key.to_owned(), Arc::clone(&bucket));
        debug!(key, rate = bucket.rate(), "rate limiter created");
        bucket
    }

    /// 以新速率重建令牌桶。
    pub fn update_rate(&self, key: &str, rate: i64) {
        let bucket = Arc::new(self.bucket(rate));
        debug!(key, rate = bucket.rate(), "rate limiter updated");
        self.limiters.write().insert(key.to_owned(), bucket);
    }

    /// 以配置值重建令牌桶；无法解析为整数的值被忽略。
    pub fn update(&self, key: &str, value: &ConfigValue) {
        match value.as_i64() {
            Some(rate) => self.update_rate(key, rate),
            None => warn!(key, value = %value.as_text(), "invalid rate limit value ignored"),
        }
    }

    /// 移除令牌桶。
    pub fn delete(&self, key: &str) -> bool {
        self.limiters.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.limiters.read().contains_key(key)
    }

    /// 按优先级返回首个已配置的速率及其键；全部未配置时返回缺省速率与最后一个键。
    pub fn rate_with_priority(source: &dyn ConfigSource, keys: &[String]) -> (i64, String) {
        for key in keys {
            if let Some(rate) = source.get_i64(key) {
                return (rate, key.clone());
            }
        }
        (DEFAULT_RATE, keys.last().cloned().unwrap_or_default())
    }

    fn bucket(&self, rate: i64) -> TokenBucket {
        let effective = if rate >= 1 { rate } else { DEFAULT_RATE };
        TokenBucket::new(effective as u64, Arc::clone(&self.clock))
    }
}

impl std::fmt::Debug for LimiterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let limiters = self.limiters.read();
        f.debug_struct("LimiterMap")
            .field("keys", &limiters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tracing_test::traced_test;
    use weave_core::configuration::MemoryConfigSource;
    use weave_core::time::MockClock;

    fn map() -> (MockClock, LimiterMap) {
        let clock = MockClock::new();
        let map = LimiterMap::new(Arc::new(clock.clone()));
        (clock, map)
    }

    #[test]
    fn three_rapid_calls_at_rate_two_admit_two() {
        let (_clock, map) = map();
        let admitted = (0..3).filter(|_| map.allow("orders", 2)).count();
        assert_eq!(admitted, 2, "速率 2 的同一窗口只放行 2 个");
    }

    #[test]
    fn repeated_resolution_reuses_one_limiter() {
        let (_clock, map) = map();
        assert!(map.allow("orders", 1));
        assert!(!map.allow("orders", 1), "复用同一个桶，不会重新装满");
        assert!(Arc::ptr_eq(&map.limiter("orders", 1), &map.limiter("orders", 100)));
    }

    #[test]
    #[traced_test]
    fn update_recreates_and_delete_removes() {
        let (_clock, map) = map();
        assert!(map.allow("orders", 1));
        assert!(!map.allow("orders", 1));

        map.update("orders", &ConfigValue::from("3"));
        assert_eq!((0..5).filter(|_| map.allow("orders", 1)).count(), 3, "更新后按新速率重建");

        map.update("orders", &ConfigValue::from("fast"));
        assert_eq!(map.limiter("orders", 1).rate(), 3, "非法值不影响现有限流器");
        assert!(logs_contain("invalid rate limit value ignored"));

        assert!(map.delete("orders"));
        assert!(!map.contains("orders"));
    }

    #[test]
    fn non_positive_rate_means_unlimited() {
        let (_clock, map) = map();
        assert!((0..1000).all(|_| map.allow("free", 0)));
        assert_eq!(map.limiter("free", 0).rate(), DEFAULT_RATE as u64);
    }

    #[test]
    fn priority_lookup_returns_most_specific_configured_key() {
        let source = MemoryConfigSource::new();
        let keys = vec!["svc.op".to_owned(), "svc".to_owned()];
        assert_eq!(
            LimiterMap::rate_with_priority(&source, &keys),
            (DEFAULT_RATE, "svc".to_owned())
        );

        source.set("svc", 10i64);
        assert_eq!(LimiterMap::rate_with_priority(&source, &keys), (10, "svc".to_owned()));
        source.set("svc.op", 5i64);
        assert_eq!(LimiterMap::rate_with_priority(&source, &keys), (5, "svc.op".to_owned()));
    }

    proptest! {
        #[test]
        fn admitted_never_exceeds_capacity_plus_refill(
            rate in 1i64..50,
            steps in proptest::collection::vec((0u64..400, 0usize..20), 1..30),
        ) {
            let (clock, map) = map();
            let mut admitted = 0u64;
            let mut elapsed_ms = 0u64;
            for (advance_ms, burst) in steps {
                clock.advance(Duration::from_millis(advance_ms));
                elapsed_ms += advance_ms;
                admitted += (0..burst).filter(|_| map.allow("k", rate)).count() as u64;
            }
            let bound = rate as u64 + (rate as u64 * elapsed_ms).div_ceil(1000);
            prop_assert!(admitted <= bound, "admitted {} > bound {}", admitted, bound);
        }

        #[test]
        fn one_instant_admits_exactly_rate(rate in 1i64..200) {
            let (_clock, map) = map();
            let admitted = (0..rate * 2).filter(|_| map.allow("k", rate)).count() as i64;
            prop_assert_eq!(admitted, rate);
        }
    }
}
