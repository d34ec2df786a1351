//! 受保护执行的结果与事件上报。

use std::sync::Arc;

use tracing::{debug, warn};
use weave_core::{CoreError, Response};

use crate::circuit::CircuitBreaker;
use crate::metrics::EventType;

/// 一次受熔断保护执行的结果，尚未上报事件。
///
/// # 教案式注释
/// - **意图 (Why)**：降级是否执行由调用方决定（需要读取调用上下文），
///   因此执行与上报拆成两步，由 [`complete`](Self::complete) 一次性收尾；
/// - **契约 (What)**：`complete` 消耗自身，保证每次执行恰好上报一次；
///   降级结果即最终响应，不会再进入重试；
/// - **风险 (Trade-offs)**：丢弃 `CommandOutcome` 而不调用 `complete` 会漏报事件。
#[must_use = "call `complete` to report events and obtain the response"]
pub struct CommandOutcome {
    circuit: Arc<CircuitBreaker>,
    event: EventType,
    response: Option<Response>,
    error: Option<CoreError>,
}

impl CommandOutcome {
    pub(crate) fn succeeded(circuit: Arc<CircuitBreaker>, response: Response) -> Self {
        Self {
            circuit,
            event: EventType::Success,
            response: Some(response),
            error: None,
        }
    }

    pub(crate) fn failed(
        circuit: Arc<CircuitBreaker>,
        event: EventType,
        error: CoreError,
        response: Option<Response>,
    ) -> Self {
        Self {
            circuit,
            event,
            response,
            error: Some(error),
        }
    }

    /// 主事件。
    pub fn event(&self) -> EventType {
        self.event
    }

    /// 失败原因；成功时为 `None`。
    pub fn error(&self) -> Option<&CoreError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 上报事件并产出最终响应。
    ///
    /// - 成功：上报成功事件，返回原响应；
    /// - 失败且无降级：上报主事件，返回原响应（若有）或由错误构造的响应；
    /// - 失败且有降级：降级成功返回降级结果，失败返回降级错误；
    ///   降级原样抛回同一错误时保留原响应。
    pub fn complete<F>(self, fallback: Option<F>) -> Response
    where
        F: FnOnce(&CoreError) -> Result<Response, CoreError>,
    {
        let Self {
            circuit,
            event,
            response,
            error,
        } = self;
        let Some(error) = error else {
            report(&circuit, &[event]);
            return response.unwrap_or_default();
        };

        let Some(fallback) = fallback else {
            report(&circuit, &[event]);
            return response.unwrap_or_else(|| Response::from_error(error));
        };

        match fallback(&error) {
            Ok(replacement) => {
                debug!(command = circuit.name(), cause = %error, "fallback succeeded");
                report(&circuit, &[event, EventType::FallbackSuccess]);
                replacement
            }
            Err(fallback_error) => {
                report(&circuit, &[event, EventType::FallbackFailure]);
                match response {
                    Some(original) if fallback_error.code() == error.code() => original,
                    _ => Response::from_error(fallback_error),
                }
            }
        }
    }
}

fn report(circuit: &CircuitBreaker, events: &[EventType]) {
    if let Err(err) = circuit.report_event(events) {
        warn!(command = circuit.name(), error = %err, "circuit event dropped");
    }
}

impl std::fmt::Debug for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOutcome")
            .field("command", &self.circuit.name())
            .field("event", &self.event)
            .field("error", &self.error)
            .finish()
    }
}
