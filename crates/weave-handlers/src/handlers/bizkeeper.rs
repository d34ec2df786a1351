//! 消费端熔断处理器。
//!
//! 把剩余链路（负载均衡、追踪、传输）包装为一次熔断命令；
//! 降级只在配置启用或强制时解析，解析失败直接以配置错误结束调用。

use std::sync::Arc;

use async_trait::async_trait;
use weave_breaker::BreakerRegistry;
use weave_core::control::ControlPanel;
use weave_core::fallback::FallbackRegistry;
use weave_core::{CoreError, Handler, Invocation, Next, Response, Role};

use super::BIZKEEPER_CONSUMER;

pub struct BizkeeperHandler {
    panel: Arc<dyn ControlPanel>,
    breakers: Arc<BreakerRegistry>,
    fallbacks: Arc<FallbackRegistry>,
}

impl BizkeeperHandler {
    pub fn new(
        panel: Arc<dyn ControlPanel>,
        breakers: Arc<BreakerRegistry>,
        fallbacks: Arc<FallbackRegistry>,
    ) -> Self {
        Self {
            panel,
            breakers,
            fallbacks,
        }
    }
}

#[async_trait]
impl Handler for BizkeeperHandler {
    fn name(&self) -> &str {
        BIZKEEPER_CONSUMER
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        let (command, config) = self.panel.circuit_breaker(inv, Role::Consumer);
        if !config.circuit_breaker_enabled {
            return next.run(inv).await;
        }
        self.breakers.configure(&command, &config);

        let policy = if config.fallback_enabled || config.force_fallback {
            match self.fallbacks.get(&config.fallback_policy) {
                Ok(policy) => Some(policy),
                Err(error) => return Response::from_error(error),
            }
        } else {
            None
        };

        let outcome = self.breakers.execute(&command, next.run(inv)).await;
        let inv: &Invocation = inv;
        outcome.complete(
            policy.map(|policy| move |cause: &CoreError| policy.fallback(inv, cause)),
        )
    }
}
