//! 调用结果。

use bytes::Bytes;

use crate::{CoreError, ErrorCategory, StatusCode, codes};

/// 一次调用的响应。
///
/// # 教案式注释
/// - **意图 (Why)**：短路处理器与终端传输步骤都以同一形态回写结果，调用方只需检查一处；
/// - **契约 (What)**：
///   - `status`：协议无关状态码；
///   - `error`：存在即表示失败，状态码与错误分类保持一致；
///   - `payload`：消费端的结果载荷；
/// - **风险 (Trade-offs)**：`Response` 可克隆，链路中途缓存响应（例如重试保留最后一次结果）
///   只复制 `Bytes` 的引用计数。
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status: StatusCode,
    pub error: Option<CoreError>,
    pub payload: Option<Bytes>,
}

impl Response {
    /// 成功响应。
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            error: None,
            payload: Some(payload.into()),
        }
    }

    /// 仅携带状态码的响应。
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            error: None,
            payload: None,
        }
    }

    /// 由错误构造失败响应，状态码按错误分类映射。
    ///
    /// 限流映射为 429；熔断与解析失败为 503；超时为 504；传输失败为 502；
    /// 其余为 500。
    pub fn from_error(error: CoreError) -> Self {
        let status = status_for(&error);
        Self {
            status,
            error: Some(error),
            payload: None,
        }
    }

    /// 以显式状态码与错误构造响应。
    pub fn failure(status: StatusCode, error: CoreError) -> Self {
        Self {
            status,
            error: Some(error),
            payload: None,
        }
    }

    /// 是否计为失败：存在错误或状态码 ≥ 500。
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status.is_server_error()
    }

    /// 错误码（若有）。
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(CoreError::code)
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    if error.code() == codes::RATE_LIMITED {
        return StatusCode::TOO_MANY_REQUESTS;
    }
    match error.category() {
        ErrorCategory::Admission | ErrorCategory::Resolution => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Transport => StatusCode::BAD_GATEWAY,
        ErrorCategory::Configuration | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories_map_to_distinct_statuses() {
        let limited = Response::from_error(CoreError::admission(codes::RATE_LIMITED, "k|1"));
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);

        let open = Response::from_error(CoreError::admission(codes::CIRCUIT_OPEN, "Consumer.orders"));
        assert_eq!(open.status, StatusCode::SERVICE_UNAVAILABLE);

        let timeout = Response::from_error(CoreError::timeout(codes::TRANSPORT_TIMEOUT, "3s"));
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn server_status_without_error_counts_as_failure() {
        assert!(Response::with_status(StatusCode::BAD_GATEWAY).is_failure());
        assert!(!Response::ok("done").is_failure(), "200 且无错误视为成功");
    }
}
