use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use weave_core::discovery::ServiceInstance;
use weave_core::{CoreError, Invocation};

use super::{Strategy, no_endpoint};

/// 按服务键共享的轮询游标。
#[derive(Debug, Default)]
pub struct RoundRobinCursors {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinCursors {
    /// 取出 `service_key` 的下一个序号。
    pub fn next(&self, service_key: &str) -> usize {
        if let Some(cursor) = self.cursors.get(service_key) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service_key.to_owned())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

/// 轮询策略。
#[derive(Debug)]
pub struct RoundRobin {
    cursors: Arc<RoundRobinCursors>,
    instances: Vec<ServiceInstance>,
    service_key: String,
}

impl RoundRobin {
    pub fn new(cursors: Arc<RoundRobinCursors>) -> Self {
        Self {
            cursors,
            instances: Vec::new(),
            service_key: String::new(),
        }
    }

    /// 供其它策略在回退时复用。
    pub(crate) fn pick_from(
        cursors: &RoundRobinCursors,
        instances: &[ServiceInstance],
        service_key: &str,
    ) -> Result<ServiceInstance, CoreError> {
        if instances.is_empty() {
            return Err(no_endpoint(service_key));
        }
        let index = cursors.next(service_key) % instances.len();
        Ok(instances[index].clone())
    }
}

impl Strategy for RoundRobin {
    fn receive_data(&mut self, _inv: &Invocation, instances: Vec<ServiceInstance>, service_key: &str) {
        self.instances = instances;
        self.service_key = service_key.to_owned();
    }

    fn pick(&mut self) -> Result<ServiceInstance, CoreError> {
        Self::pick_from(&self.cursors, &self.instances, &self.service_key)
    }
}
