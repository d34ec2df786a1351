use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weave_core::time::Clock;
use weave_core::transport::TransportRegistry;
use weave_core::{CoreError, Handler, Invocation, Next, Response, codes};
use weave_loadbalance::LatencyStats;

use super::TRANSPORT;

/// 消费端链尾：按协议取传输适配器发起调用，并把耗时记入延迟统计。
///
/// 协议取调用上已确定的值，否则取已注册协议中字典序最小者；未选出地址时以解析错误结束。
pub struct TransportHandler {
    transports: Arc<TransportRegistry>,
    latency: Arc<LatencyStats>,
    clock: Arc<dyn Clock>,
}

impl TransportHandler {
    pub fn new(transports: Arc<TransportRegistry>, latency: Arc<LatencyStats>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transports,
            latency,
            clock,
        }
    }
}

#[async_trait]
impl Handler for TransportHandler {
    fn name(&self) -> &str {
        TRANSPORT
    }

    async fn handle(&self, _next: Next<'_>, inv: &mut Invocation) -> Response {
        let Some(protocol) = inv.protocol.clone().or_else(|| self.transports.first_protocol()) else {
            return Response::from_error(CoreError::resolution(
                codes::TRANSPORT_NOT_FOUND,
                "no transport is registered",
            ));
        };
        let transport = match self.transports.get(&protocol) {
            Ok(transport) => transport,
            Err(error) => return Response::from_error(error),
        };
        let Some(endpoint) = inv.endpoint.clone() else {
            return Response::from_error(CoreError::resolution(
                codes::NO_ENDPOINT,
                format!("no endpoint selected for `{}`", inv.microservice_name),
            ));
        };

        let started = self.clock.now();
        let result = transport.call(&endpoint, inv).await;
        let elapsed = self.clock.now().saturating_duration_since(started);
        self.latency
            .record(&inv.microservice_name, &protocol, &endpoint, elapsed);

        match result {
            Ok(response) => response,
            Err(error) => {
                debug!(
                    service = %inv.microservice_name,
                    %endpoint,
                    error = %error,
                    "transport call failed"
                );
                Response::from_error(error)
            }
        }
    }
}
