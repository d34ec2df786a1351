//! # 负载均衡与重试处理器
//!
//! ## 核心意图（Why）
//! - 为调用选出目标地址；启用重试时，在同一地址与后续新选地址上重放剩余链路。
//!
//! ## 逻辑解析（How）
//! 1. 进入时记录游标并缓冲请求体；
//! 2. 外层循环最多 `retry_on_next + 1` 轮，每轮重新选址；内层在同一地址上最多尝试 `retry_on_same + 1` 次；
//! 3. 每次尝试前回拨游标、重放请求体，第二次起按退避等待；
//! 4. 响应不满足重试条件即返回；尝试耗尽返回最后一次响应。
//!
//! ## 风险提示（Trade-offs）
//! - 首轮选址失败直接返回解析错误；后续轮次选址失败时停止重试并返回最后一次响应。
//! - 流式请求体在重试前会被完整读入内存。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weave_core::control::ControlPanel;
use weave_core::{Handler, Invocation, Next, Response};
use weave_loadbalance::{Backoff, LoadBalancer, RetryCondition};

use super::LOADBALANCE;

pub struct LoadBalanceHandler {
    panel: Arc<dyn ControlPanel>,
    balancer: Arc<LoadBalancer>,
    condition: RetryCondition,
}

impl LoadBalanceHandler {
    pub fn new(panel: Arc<dyn ControlPanel>, balancer: Arc<LoadBalancer>, condition: RetryCondition) -> Self {
        Self {
            panel,
            balancer,
            condition,
        }
    }
}

#[async_trait]
impl Handler for LoadBalanceHandler {
    fn name(&self) -> &str {
        LOADBALANCE
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        let config = self.panel.load_balancing(inv);
        if config.max_attempts() <= 1 {
            return match self.balancer.select_endpoint(inv, &config).await {
                Ok(endpoint) => {
                    inv.endpoint = Some(endpoint);
                    next.run(inv).await
                }
                Err(error) => Response::from_error(error),
            };
        }

        let body = match inv.buffer_body().await {
            Ok(body) => body,
            Err(error) => return Response::from_error(error),
        };
        let cursor = inv.handler_index();
        let backoff = Backoff::new(config.backoff);
        let mut attempt = 0u32;
        let mut last = Response::default();

        for round in 0..=config.retry_on_next {
            let endpoint = match self.balancer.select_endpoint(inv, &config).await {
                Ok(endpoint) => endpoint,
                Err(error) if round == 0 => return Response::from_error(error),
                Err(error) => {
                    debug!(error = %error, round, "re-selection failed, retry stopped");
                    break;
                }
            };
            inv.endpoint = Some(endpoint);

            for _ in 0..=config.retry_on_same {
                if attempt > 0 {
                    let delay = backoff.delay(attempt - 1);
                    debug!(
                        service = %inv.microservice_name,
                        endpoint = inv.endpoint.as_deref().unwrap_or_default(),
                        attempt,
                        status = %last.status,
                        ?delay,
                        "retrying call"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                inv.set_handler_index(cursor);
                inv.replay_body(body.clone());
                attempt = attempt.saturating_add(1);

                let response = next.run(inv).await;
                if !self.condition.need_retry(&response) {
                    return response;
                }
                last = response;
            }
        }
        last
    }
}
