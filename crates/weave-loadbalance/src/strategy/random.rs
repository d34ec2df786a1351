use rand::Rng;
use weave_core::discovery::ServiceInstance;
use weave_core::{CoreError, Invocation};

use super::{Strategy, no_endpoint};

/// 均匀随机策略。
#[derive(Debug, Default)]
pub struct RandomStrategy {
    instances: Vec<ServiceInstance>,
    service_key: String,
}

impl Strategy for RandomStrategy {
    fn receive_data(&mut self, _inv: &Invocation, instances: Vec<ServiceInstance>, service_key: &str) {
        self.instances = instances;
        self.service_key = service_key.to_owned();
    }

    fn pick(&mut self) -> Result<ServiceInstance, CoreError> {
        if self.instances.is_empty() {
            return Err(no_endpoint(&self.service_key));
        }
        let index = rand::thread_rng().gen_range(0..self.instances.len());
        Ok(self.instances[index].clone())
    }
}
