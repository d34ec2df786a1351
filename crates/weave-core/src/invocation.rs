//! # Invocation：一次 RPC 调用的完整上下文
//!
//! ## 核心意图（Why）
//! - 协议适配器在边界处为每次调用创建一个 [`Invocation`]，随后它在处理器链中被就地修改
//!   （端点、策略、协议逐步填充），响应回写后即丢弃；
//! - 处理器游标存放在调用本身而非链上，使同一条链可以被并发调用安全复用。
//!
//! ## 行为契约（What）
//! - 一个 `Invocation` 永不在并发调用之间共享；
//! - [`InvocationContext`] 由不可变的入站头与可变的本地写入组成，读取时本地写入优先；
//! - 请求体在首次重试前通过 [`Invocation::buffer_body`] 缓冲，之后每次尝试由
//!   [`Invocation::replay_body`] 重放，避免消费已耗尽的流。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::{CoreError, codes};

/// 调用方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// 入站：本进程作为服务提供者。
    Provider,
    /// 出站：本进程作为服务消费者。
    Consumer,
}

impl Role {
    /// 稳定名称，同时用作熔断命令与配置键的前缀。
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Provider => "Provider",
            Role::Consumer => "Consumer",
        }
    }

    /// 解析角色名称。
    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "Provider" => Some(Role::Provider),
            "Consumer" => Some(Role::Consumer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteType {
    /// 直接调用选中的实例。
    #[default]
    Direct,
    /// 经由本地 sidecar 转发。
    Sidecar,
}

/// 请求体。
pub enum Body {
    Empty,
    Buffered(Bytes),
    Streaming(BoxStream<'static, Result<Bytes, CoreError>>),
}

impl Body {
    /// 是否为未缓冲的流。
    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Streaming(_))
    }

    /// 已缓冲内容的视图；流式或空请求体返回 `None`。
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Buffered(bytes)
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// 跨进程传播的头部映射。
///
/// # 教案式注释
/// - **意图 (Why)**：入站头在适配器边界一次性确定，后续处理器只追加本地写入，
///   因此外层以 `Arc` 共享、内层独立可变；
/// - **契约 (What)**：`get` 先查本地写入再查入站头；`headers` 返回合并视图，
///   本地写入覆盖同名入站头。
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    inbound: Arc<HashMap<String, String>>,
    local: HashMap<String, String>,
}

impl InvocationContext {
    /// 以入站头创建上下文。
    pub fn from_inbound(inbound: HashMap<String, String>) -> Self {
        Self {
            inbound: Arc::new(inbound),
            local: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.local
            .get(key)
            .or_else(|| self.inbound.get(key))
            .map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.local.insert(key.into(), value.into());
    }

    /// 合并后的全部头部。
    pub fn headers(&self) -> HashMap<String, String> {
        let mut merged = (*self.inbound).clone();
        merged.extend(self.local.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// 一次 RPC 调用。
///
/// 字段按身份、路由、载荷、上下文分组；`handler_index` 为私有游标，
/// 只能经由 [`Chain`](crate::Chain) 与重试逻辑读写。
#[derive(Debug, Default)]
pub struct Invocation {
    pub microservice_name: String,
    pub schema_id: String,
    pub operation_id: String,
    pub source_microservice: String,

    pub protocol: Option<String>,
    pub port_name: Option<String>,
    pub endpoint: Option<String>,
    pub strategy: Option<String>,
    pub filters: Vec<String>,
    pub route_tags: HashMap<String, String>,
    pub route_type: RouteType,
    pub no_discovery: bool,
    pub url_path: String,

    pub metadata: HashMap<String, String>,
    pub context: InvocationContext,
    pub body: Body,

    handler_index: usize,
}

impl Invocation {
    /// 以目标服务与操作创建调用。
    pub fn new(microservice: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            microservice_name: microservice.into(),
            operation_id: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema_id = schema.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_microservice = source.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::from(body.into());
        self
    }

    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_url_path(mut self, path: impl Into<String>) -> Self {
        self.url_path = path.into();
        self
    }

    pub fn with_no_discovery(mut self, no_discovery: bool) -> Self {
        self.no_discovery = no_discovery;
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// `服务[.schema].操作`，空段被忽略。
    pub fn operation_qualified_name(&self) -> String {
        [
            self.microservice_name.as_str(),
            self.schema_id.as_str(),
            self.operation_id.as_str(),
        ]
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
    }

    /// 当前处理器游标。
    pub fn handler_index(&self) -> usize {
        self.handler_index
    }

    /// 回拨或推进处理器游标。
    pub fn set_handler_index(&mut self, index: usize) {
        self.handler_index = index;
    }

    /// 将请求体完整读入内存并返回副本，调用后请求体变为 `Buffered`。
    ///
    /// # 契约说明（What）
    /// - 已缓冲或为空时不产生额外拷贝；
    /// - 流中出现错误时返回 `transport.body_unavailable`，请求体保持为空。
    pub async fn buffer_body(&mut self) -> Result<Bytes, CoreError> {
        match std::mem::take(&mut self.body) {
            Body::Empty => Ok(Bytes::new()),
            Body::Buffered(bytes) => {
                self.body = Body::Buffered(bytes.clone());
                Ok(bytes)
            }
            Body::Streaming(mut stream) => {
                let mut collected = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|err| {
                        CoreError::transport(
                            codes::BODY_UNAVAILABLE,
                            format!("failed to buffer request body: {}", err.message()),
                        )
                        .with_cause(err)
                    })?;
                    collected.extend_from_slice(&chunk);
                }
                let bytes = collected.freeze();
                self.body = Body::from(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// 以缓冲内容重置请求体。
    pub fn replay_body(&mut self, bytes: Bytes) {
        self.body = Body::from(bytes);
    }
}
