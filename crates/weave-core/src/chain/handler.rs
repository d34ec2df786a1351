use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{Invocation, Response};

/// 处理器链中的一个横切步骤。
///
/// # 教案式注释
/// - **意图 (Why)**：限流、熔断、负载均衡、追踪等关注点以统一形态串联，
///   每个处理器既能在下游执行前动作，也能在下游返回后动作；
/// - **契约 (What)**：
///   - 放行：调用 `next.run(inv).await` 并返回（可加工的）下游响应；
///   - 短路：不调用 `next`，直接返回携带错误的 [`Response`]；
///   - 返回值即“回调”，每次 `handle` 恰好产生一个响应；
/// - **执行 (How)**：`await` 之后的代码自然按 LIFO 顺序展开，对应续接式回调的嵌套；
/// - **风险 (Trade-offs)**：处理器可多次调用 `next`（重试），此时必须先通过
///   [`Invocation::set_handler_index`] 回拨游标。
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// 注册名称。
    fn name(&self) -> &str;

    /// 处理一次调用。
    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response;
}

/// 链尾终点：所有处理器放行后执行的业务逻辑或出站调用。
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn serve(&self, inv: &mut Invocation) -> Response;
}

/// 不做任何事的终点，返回默认成功响应。
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyEndpoint;

#[async_trait]
impl Endpoint for EmptyEndpoint {
    async fn serve(&self, _inv: &mut Invocation) -> Response {
        Response::default()
    }
}

/// 剩余链路的续接句柄。
///
/// `Next` 只持有借用，可复制；游标存放在 [`Invocation`] 上，
/// 因此同一句柄可以在重试中反复使用。
#[derive(Clone, Copy)]
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(handlers: &'a [Arc<dyn Handler>], endpoint: &'a dyn Endpoint) -> Self {
        Self { handlers, endpoint }
    }

    /// 执行游标所指的下一个处理器；游标越过链尾时交给终点。
    pub fn run<'b>(self, inv: &'b mut Invocation) -> BoxFuture<'b, Response>
    where
        'a: 'b,
    {
        let index = inv.handler_index();
        match self.handlers.get(index) {
            Some(handler) => {
                inv.set_handler_index(index + 1);
                handler.handle(self, inv)
            }
            None => self.endpoint.serve(inv),
        }
    }

    /// 剩余处理器数量。
    pub fn remaining(&self, inv: &Invocation) -> usize {
        self.handlers.len().saturating_sub(inv.handler_index())
    }
}
