//! 调用计量存储。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use weave_core::Role;

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    failures: AtomicU64,
    latency_nanos: AtomicU64,
}

/// 某个 `(角色, 服务, 操作)` 的累计值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub total_latency: Duration,
}

impl CallSnapshot {
    /// 平均耗时；尚无请求时为零。
    pub fn mean_latency(&self) -> Duration {
        if self.requests == 0 {
            return Duration::ZERO;
        }
        self.total_latency / u32::try_from(self.requests).unwrap_or(u32::MAX)
    }
}

/// 按 `(角色, 服务, 操作)` 聚合的请求数、失败数与累计耗时。
#[derive(Debug, Default)]
pub struct CallMetrics {
    calls: DashMap<(Role, String, String), Counters>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, role: Role, service: &str, operation: &str, latency: Duration, failed: bool) {
        let key = (role, service.to_owned(), operation.to_owned());
        let counters = self.calls.entry(key).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        counters.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self, role: Role, service: &str, operation: &str) -> Option<CallSnapshot> {
        self.calls
            .get(&(role, service.to_owned(), operation.to_owned()))
            .map(|counters| snapshot_of(&counters))
    }

    /// 全部条目，按键排序。
    pub fn snapshot_all(&self) -> Vec<((Role, String, String), CallSnapshot)> {
        let mut all: Vec<_> = self
            .calls
            .iter()
            .map(|entry| (entry.key().clone(), snapshot_of(entry.value())))
            .collect();
        all.sort_by(|left, right| {
            (left.0.0.as_str(), &left.0.1, &left.0.2).cmp(&(right.0.0.as_str(), &right.0.1, &right.0.2))
        });
        all
    }
}

fn snapshot_of(counters: &Counters) -> CallSnapshot {
    CallSnapshot {
        requests: counters.requests.load(Ordering::Relaxed),
        failures: counters.failures.load(Ordering::Relaxed),
        total_latency: Duration::from_nanos(counters.latency_nanos.load(Ordering::Relaxed)),
    }
}
