//! 命令级并发额度。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 限制单个熔断命令同时执行的请求数。
///
/// 额度上限可在运行期调整；已发出的票据不受影响，归还时按实际占用递减。
#[derive(Debug)]
pub struct ExecutorPool {
    max: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl ExecutorPool {
    pub fn new(max: usize) -> Self {
        Self {
            max: AtomicUsize::new(max),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 尝试占用一个额度；额度耗尽时返回 `None`。
    pub fn try_acquire(&self) -> Option<Ticket> {
        let max = self.max.load(Ordering::Acquire);
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < max).then_some(active + 1)
            })
            .ok()
            .map(|_| Ticket {
                active: Arc::clone(&self.active),
            })
    }

    pub fn set_max(&self, max: usize) {
        self.max.store(max, Ordering::Release);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::Acquire)
    }

    /// 当前占用数。
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// 并发额度票据，析构时归还。
#[derive(Debug)]
pub struct Ticket {
    active: Arc<AtomicUsize>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_are_bounded_and_returned_on_drop() {
        let pool = ExecutorPool::new(2);
        let first = pool.try_acquire().expect("额度充足");
        let second = pool.try_acquire().expect("额度充足");
        assert!(pool.try_acquire().is_none(), "第三个请求应被拒绝");

        drop(first);
        assert_eq!(pool.active(), 1);
        assert!(pool.try_acquire().is_some(), "归还后可再次占用");
        drop(second);
        assert_eq!(pool.active(), 0);
    }
}
