use async_trait::async_trait;
use tracing::{Instrument, debug, info_span};
use weave_core::{Handler, Invocation, Next, Response, Role};
use weave_telemetry::{TRACEPARENT, TraceContext};

use super::{TRACING_CONSUMER, TRACING_PROVIDER};

/// 记录本次调用逻辑父 span 的元数据键；重试的各次尝试都派生自它，互为兄弟。
pub const TRACE_PARENT_METADATA: &str = "trace.parent";

/// 追踪处理器。
///
/// - 消费端：以入站 `traceparent` 的子 span 写回调用上下文，随传输发往对端；
///   父 span 在首次经过时记入元数据，重试不会把上一次尝试当作父级；
/// - 提供端：延续入站 `traceparent`，缺失或非法时新建根，写入本地上下文供业务读取；
/// - 下游执行包裹在 `rpc.client` / `rpc.server` span 中。
pub struct TracingHandler {
    role: Role,
    enabled: bool,
}

impl TracingHandler {
    pub fn new(role: Role, enabled: bool) -> Self {
        Self { role, enabled }
    }
}

#[async_trait]
impl Handler for TracingHandler {
    fn name(&self) -> &str {
        match self.role {
            Role::Provider => TRACING_PROVIDER,
            Role::Consumer => TRACING_CONSUMER,
        }
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        if !self.enabled {
            return next.run(inv).await;
        }
        let recorded = inv
            .metadata
            .get(TRACE_PARENT_METADATA)
            .and_then(|raw| TraceContext::parse(raw));
        let parent = match recorded {
            Some(parent) => parent,
            None => {
                let parent = inv
                    .context
                    .get(TRACEPARENT)
                    .and_then(TraceContext::parse)
                    .unwrap_or_else(TraceContext::new_root);
                inv.metadata
                    .insert(TRACE_PARENT_METADATA.to_owned(), parent.to_string());
                parent
            }
        };
        let context = parent.child();
        inv.context.insert(TRACEPARENT, context.to_string());

        let span = match self.role {
            Role::Consumer => info_span!(
                "rpc.client",
                service = %inv.microservice_name,
                operation = %inv.operation_id,
                trace_id = %context.trace_id(),
                span_id = %context.span_id(),
                parent_span_id = %parent.span_id(),
            ),
            Role::Provider => info_span!(
                "rpc.server",
                service = %inv.microservice_name,
                operation = %inv.operation_id,
                trace_id = %context.trace_id(),
                span_id = %context.span_id(),
                parent_span_id = %parent.span_id(),
            ),
        };
        let response = next.run(inv).instrument(span).await;
        debug!(
            trace_id = %context.trace_id(),
            status = %response.status,
            "traced call finished"
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use weave_core::chain::handler_registry;
    use weave_core::{ChainRegistry, Endpoint};

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn serve(&self, inv: &mut Invocation) -> Response {
            Response::ok(inv.context.get(TRACEPARENT).unwrap_or_default().to_owned())
        }
    }

    #[tokio::test]
    async fn provider_continues_inbound_trace() {
        let handlers = handler_registry();
        handlers.install(TRACING_PROVIDER, || {
            Arc::new(TracingHandler::new(Role::Provider, true)) as Arc<dyn Handler>
        });
        let chain = ChainRegistry::new()
            .build(Role::Provider, "default", &[TRACING_PROVIDER], &handlers)
            .expect("链可构建");

        let inbound = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let mut inv = Invocation::new("orders", "GetOrder").with_context(
            weave_core::InvocationContext::from_inbound(
                [(TRACEPARENT.to_owned(), inbound.to_owned())].into(),
            ),
        );
        let response = chain.execute_with(&mut inv, &Echo).await;
        let seen = String::from_utf8(response.payload.unwrap_or_default().to_vec()).unwrap_or_default();
        let seen = TraceContext::parse(&seen).expect("业务可见 traceparent");
        assert_eq!(seen.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736", "沿用入站 trace");
        assert_ne!(seen.span_id(), "00f067aa0ba902b7", "新建子 span");
    }

    /// 在同一调用上把剩余链路执行两次，模拟重试。
    struct RunTwice;

    #[async_trait]
    impl Handler for RunTwice {
        fn name(&self) -> &str {
            "run-twice"
        }

        async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
            let cursor = inv.handler_index();
            let _ = next.run(inv).await;
            inv.set_handler_index(cursor);
            next.run(inv).await
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Endpoint for Recorder {
        async fn serve(&self, inv: &mut Invocation) -> Response {
            let header = inv.context.get(TRACEPARENT).unwrap_or_default().to_owned();
            self.seen.lock().push(header);
            Response::ok("")
        }
    }

    #[tokio::test]
    async fn retried_attempts_are_siblings_under_inbound_parent() {
        let handlers = handler_registry();
        handlers.install("run-twice", || Arc::new(RunTwice) as Arc<dyn Handler>);
        handlers.install(TRACING_CONSUMER, || {
            Arc::new(TracingHandler::new(Role::Consumer, true)) as Arc<dyn Handler>
        });
        let chain = ChainRegistry::new()
            .build(Role::Consumer, "default", &["run-twice", TRACING_CONSUMER], &handlers)
            .expect("链可构建");

        let inbound = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let mut inv = Invocation::new("orders", "GetOrder").with_context(
            weave_core::InvocationContext::from_inbound(
                [(TRACEPARENT.to_owned(), inbound.to_owned())].into(),
            ),
        );
        let recorder = Recorder::default();
        chain.execute_with(&mut inv, &recorder).await;

        let seen: Vec<TraceContext> = recorder
            .seen
            .lock()
            .iter()
            .filter_map(|header| TraceContext::parse(header))
            .collect();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|attempt| attempt.trace_id() == "4bf92f3577b34da6a3ce929d0e0e4736"));
        assert_ne!(seen[0].span_id(), seen[1].span_id(), "每次尝试各自一个 span");
        assert_eq!(
            inv.metadata.get(TRACE_PARENT_METADATA).map(String::as_str),
            Some(inbound),
            "两次尝试共用入站父 span"
        );
    }

    #[tokio::test]
    async fn disabled_handler_leaves_context_untouched() {
        let handlers = handler_registry();
        handlers.install(TRACING_CONSUMER, || {
            Arc::new(TracingHandler::new(Role::Consumer, false)) as Arc<dyn Handler>
        });
        let chain = ChainRegistry::new()
            .build(Role::Consumer, "default", &[TRACING_CONSUMER], &handlers)
            .expect("链可构建");
        let mut inv = Invocation::new("orders", "GetOrder");
        let response = chain.execute_with(&mut inv, &Echo).await;
        assert_eq!(response.payload.unwrap_or_default().len(), 0);
    }
}
