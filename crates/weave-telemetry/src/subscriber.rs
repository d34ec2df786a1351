use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};
use weave_core::{CoreError, codes};

static INSTALLED: OnceLock<TelemetryConfig> = OnceLock::new();

/// 日志输出配置。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `RUST_LOG` 缺失或无法解析时使用的过滤指令。
    pub directive: String,
    pub ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directive: "info".to_owned(),
            ansi: false,
            with_target: true,
        }
    }
}

/// 安装阶段的失败路径。
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber has been set elsewhere")]
    SubscriberAlreadySet,
    #[error("invalid filter directive `{directive}`")]
    InvalidDirective {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to set global subscriber")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl From<TelemetryError> for CoreError {
    fn from(error: TelemetryError) -> Self {
        CoreError::configuration(codes::CONFIG_INVALID, error.to_string()).with_cause(error)
    }
}

/// 安装全局订阅器：`EnvFilter` 加 fmt 层。
///
/// # 教案式说明
/// - **逻辑（How）**：
///   1. 已安装或外部已设置订阅器时直接返回错误；
///   2. 过滤器优先取 `RUST_LOG`，否则解析 `config.directive`；
///   3. 设置全局订阅器成功后登记配置，后续调用被拒绝。
/// - **风险（Trade-offs）**：全局状态不可卸载；测试应使用 `tracing-test` 而非本函数。
pub fn install(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.directive).map_err(|source| {
            TelemetryError::InvalidDirective {
                directive: config.directive.clone(),
                source,
            }
        })?,
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(config.ansi)
            .with_target(config.with_target),
    );
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(config.clone())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}
