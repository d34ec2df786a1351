use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weave_control::RouteRuleTable;
use weave_core::{Handler, Invocation, Next, Response};

use super::ROUTER;

/// 路由处理器：按规则表为调用填写目标标签，负载均衡只在匹配这些标签的实例中选址。
///
/// - 调用方已指定标签时不做改写；
/// - 来源标签取自调用元数据，请求头取自调用上下文的合并视图。
pub struct RouterHandler {
    rules: Arc<RouteRuleTable>,
}

impl RouterHandler {
    pub fn new(rules: Arc<RouteRuleTable>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Handler for RouterHandler {
    fn name(&self) -> &str {
        ROUTER
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        if inv.route_tags.is_empty() {
            if let Some(tags) = self.rules.route(inv, &inv.metadata) {
                debug!(service = %inv.microservice_name, ?tags, "route tags selected");
                inv.route_tags = tags.into_iter().collect();
            }
        }
        next.run(inv).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_control::{RouteRule, RouteTag};
    use weave_core::chain::handler_registry;
    use weave_core::{ChainRegistry, Endpoint, Role};

    struct EchoTags;

    #[async_trait]
    impl Endpoint for EchoTags {
        async fn serve(&self, inv: &mut Invocation) -> Response {
            Response::ok(inv.route_tags.get("version").cloned().unwrap_or_default())
        }
    }

    fn chain(rules: Arc<RouteRuleTable>) -> Arc<weave_core::Chain> {
        let handlers = handler_registry();
        handlers.install(ROUTER, move || {
            Arc::new(RouterHandler::new(Arc::clone(&rules))) as Arc<dyn Handler>
        });
        ChainRegistry::new()
            .build(Role::Consumer, "default", &[ROUTER], &handlers)
            .expect("链可构建")
    }

    fn canary_rules() -> Arc<RouteRuleTable> {
        let table = RouteRuleTable::new();
        let rule = RouteRule {
            routes: vec![RouteTag {
                weight: 100,
                tags: [("version".to_owned(), "v2".to_owned())].into(),
            }],
            ..RouteRule::default()
        };
        table.set_rules("orders", vec![rule]).expect("合法规则");
        Arc::new(table)
    }

    #[tokio::test]
    async fn matching_rule_fills_route_tags() {
        let chain = chain(canary_rules());
        let mut inv = Invocation::new("orders", "GetOrder");
        let response = chain.execute_with(&mut inv, &EchoTags).await;
        assert_eq!(response.payload.as_deref(), Some(&b"v2"[..]));
    }

    #[tokio::test]
    async fn caller_tags_are_kept() {
        let chain = chain(canary_rules());
        let mut inv = Invocation::new("orders", "GetOrder");
        inv.route_tags.insert("version".to_owned(), "v1".to_owned());
        let response = chain.execute_with(&mut inv, &EchoTags).await;
        assert_eq!(response.payload.as_deref(), Some(&b"v1"[..]), "调用方指定的标签优先");
    }
}
