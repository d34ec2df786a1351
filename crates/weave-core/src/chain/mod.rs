//! # 处理器链
//!
//! ## 核心意图（Why）
//! - 以名称列表声明处理器顺序，运行时按 [`Role`] 与链名称寻址；
//! - 续接式控制流通过 [`Next`] 表达：正向按声明顺序进入，响应侧逻辑按 LIFO 展开。
//!
//! ## 行为契约（What）
//! - 链在启动期构建，之后只读；游标保存在 [`Invocation`] 上，同一条链可被并发调用；
//! - [`Chain::execute_with`] 每次重置游标，捕获处理器 panic 并转换为 `runtime.panic` 响应，
//!   保证每次调用恰好产生一个响应；
//! - 构建时引用未注册的处理器名称会返回配置错误。

mod handler;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::error;

pub use handler::{EmptyEndpoint, Endpoint, Handler, Next};

use crate::registry::FactoryRegistry;
use crate::{CoreError, ErrorCategory, Invocation, Response, Role, codes};

/// 处理器工厂。
pub type HandlerFactory = crate::registry::Factory<Arc<dyn Handler>>;

/// 处理器注册表。
pub type HandlerRegistry = FactoryRegistry<Arc<dyn Handler>>;

/// 创建空的处理器注册表。
pub fn handler_registry() -> HandlerRegistry {
    FactoryRegistry::new(
        "handler",
        codes::HANDLER_NOT_FOUND,
        ErrorCategory::Configuration,
    )
}

/// 一条已构建的处理器链。
pub struct Chain {
    name: String,
    role: Role,
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    pub fn new(role: Role, name: impl Into<String>, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            name: name.into(),
            role,
            handlers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 处理器名称，按执行顺序排列。
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// 以空终点执行整条链。
    pub async fn execute(&self, inv: &mut Invocation) -> Response {
        self.execute_with(inv, &EmptyEndpoint).await
    }

    /// 执行整条链，全部处理器放行后由 `endpoint` 产生响应。
    ///
    /// # 执行逻辑（How）
    /// 1. 将游标重置为 0，保证调用从链首开始；
    /// 2. 以 `catch_unwind` 包裹整个续接，任何处理器或终点的 panic 都被转换为内部错误响应。
    pub async fn execute_with(&self, inv: &mut Invocation, endpoint: &dyn Endpoint) -> Response {
        inv.set_handler_index(0);
        let next = Next::new(&self.handlers, endpoint);
        let outcome = AssertUnwindSafe(next.run(inv)).catch_unwind().await;
        match outcome {
            Ok(response) => response,
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                error!(
                    chain = %self.name,
                    role = %self.role,
                    service = %inv.microservice_name,
                    operation = %inv.operation_id,
                    panic = %detail,
                    "handler chain panicked"
                );
                Response::from_error(CoreError::internal(
                    codes::RUNTIME_PANIC,
                    format!("handler chain `{}` panicked: {detail}", self.name),
                ))
            }
        }
    }

    /// 执行整条链并把唯一的响应交给 `callback`。
    pub async fn invoke<F>(&self, inv: &mut Invocation, endpoint: &dyn Endpoint, callback: F)
    where
        F: FnOnce(Response),
    {
        let response = self.execute_with(inv, endpoint).await;
        callback(response);
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// 按角色与名称索引的链注册表。
///
/// # 教案式注释
/// - **意图 (Why)**：同一进程可以为不同协议声明多条具名链；
/// - **契约 (What)**：`build` 会解析全部处理器名称，任一缺失即返回
///   `chain.handler_not_found`，注册表保持不变；
/// - **风险 (Trade-offs)**：重复 `build` 同名链会替换旧链，已取得旧链 `Arc` 的调用不受影响。
#[derive(Default)]
pub struct ChainRegistry {
    chains: RwLock<HashMap<(Role, String), Arc<Chain>>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以处理器名称列表构建并登记一条链。
    pub fn build<S: AsRef<str>>(
        &self,
        role: Role,
        name: &str,
        handler_names: &[S],
        handlers: &HandlerRegistry,
    ) -> Result<Arc<Chain>, CoreError> {
        let resolved = handler_names
            .iter()
            .map(|handler| handlers.resolve(handler.as_ref().trim()))
            .collect::<Result<Vec<_>, _>>()?;
        let chain = Arc::new(Chain::new(role, name, resolved));
        self.chains
            .write()
            .insert((role, name.to_owned()), Arc::clone(&chain));
        Ok(chain)
    }

    /// 获取已构建的链。
    pub fn get(&self, role: Role, name: &str) -> Result<Arc<Chain>, CoreError> {
        self.chains
            .read()
            .get(&(role, name.to_owned()))
            .cloned()
            .ok_or_else(|| {
                CoreError::configuration(
                    codes::CHAIN_NOT_FOUND,
                    format!("{role} chain `{name}` has not been built"),
                )
            })
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains = self.chains.read();
        f.debug_struct("ChainRegistry")
            .field("chains", &chains.keys().collect::<Vec<_>>())
            .finish()
    }
}
