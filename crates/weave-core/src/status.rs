//! 协议无关的响应状态码。
//!
//! 沿用 HTTP 数值语义，各协议适配器负责与自身线上的状态表示互转。

use std::fmt;

/// 响应状态码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    /// 以原始数值构造。
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// 原始数值。
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 是否为 2xx。
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 是否为服务端错误（≥ 500），熔断器据此计为失败事件。
    pub fn is_server_error(self) -> bool {
        self.0 >= 500
    }

    /// 重试条件中使用的标签，例如 `http_503`。
    pub fn retry_label(self) -> String {
        format!("http_{}", self.0)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}
