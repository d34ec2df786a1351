//! 可重试失败的判定。

use std::collections::BTreeSet;

use weave_core::{ErrorCategory, Response, codes};

/// 缺省重试条件。
pub const DEFAULT_RETRY_CONDITION: &str = "http_500,http_502,http_503,timeout";

/// 由逗号分隔的条件串解析出的重试白名单。
///
/// # 契约说明（What）
/// - `http_<code>`：对端以该状态应答时重试；`timeout`：超时重试；
/// - 准入、解析、配置与内部错误永不重试；
/// - 其余传输错误（连接失败等）总是重试；状态类传输错误按状态码判定。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryCondition {
    statuses: BTreeSet<u16>,
    timeout: bool,
}

impl RetryCondition {
    /// 解析条件串；无法识别的条目被忽略。
    pub fn parse(raw: &str) -> Self {
        let mut statuses = BTreeSet::new();
        let mut timeout = false;
        for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if item.eq_ignore_ascii_case("timeout") {
                timeout = true;
            } else if let Some(code) = item.strip_prefix("http_").and_then(|code| code.parse().ok()) {
                statuses.insert(code);
            }
        }
        Self { statuses, timeout }
    }

    /// 该响应是否值得再试一次。
    pub fn need_retry(&self, response: &Response) -> bool {
        match &response.error {
            None => self.statuses.contains(&response.status.as_u16()),
            Some(error) => match error.category() {
                ErrorCategory::Timeout => self.timeout,
                ErrorCategory::Transport if error.code() == codes::TRANSPORT_STATUS => {
                    self.statuses.contains(&response.status.as_u16())
                }
                ErrorCategory::Transport => true,
                ErrorCategory::Admission
                | ErrorCategory::Resolution
                | ErrorCategory::Configuration
                | ErrorCategory::Internal => false,
            },
        }
    }
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self::parse(DEFAULT_RETRY_CONDITION)
    }
}
