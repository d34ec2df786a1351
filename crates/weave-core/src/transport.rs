//! 出站传输适配器契约。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{CoreError, Invocation, Response, codes};

/// 执行真实网络调用的协议适配器。
///
/// # 契约说明（What）
/// - `endpoint` 为负载均衡选出的地址；
/// - 连接失败、超时应返回带 `Transport` / `Timeout` 分类的错误，以便重试条件识别；
/// - 对端以非成功状态应答时返回 `Ok(Response)` 且状态码如实反映。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, endpoint: &str, inv: &mut Invocation) -> Result<Response, CoreError>;
}

/// 协议名到适配器实例的映射。
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, protocol: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.write().insert(protocol.into(), transport);
    }

    pub fn get(&self, protocol: &str) -> Result<Arc<dyn Transport>, CoreError> {
        self.transports.read().get(protocol).cloned().ok_or_else(|| {
            CoreError::resolution(
                codes::TRANSPORT_NOT_FOUND,
                format!("no transport registered for protocol `{protocol}`"),
            )
        })
    }

    /// 已注册协议中字典序最小者，调用与实例均未声明协议时使用。
    pub fn first_protocol(&self) -> Option<String> {
        self.transports.read().keys().min().cloned()
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transports = self.transports.read();
        f.debug_struct("TransportRegistry")
            .field("protocols", &transports.keys().collect::<Vec<_>>())
            .finish()
    }
}
