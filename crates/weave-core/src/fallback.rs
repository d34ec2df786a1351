//! 熔断降级策略。
//!
//! 降级在主调用失败或熔断短路后执行，结果即最终响应，不会再被重试。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{CoreError, Invocation, Response, StatusCode, codes};

/// 返回空结果的策略名称。
pub const RETURN_NULL: &str = "returnnull";
/// 透传原始错误的策略名称，也是缺省策略。
pub const THROW_EXCEPTION: &str = "throwexception";

/// 降级策略。
///
/// - `Ok(response)`：以降级结果替代失败，熔断器记录降级成功；
/// - `Err(error)`：降级失败，调用方收到该错误。
pub trait FallbackPolicy: Send + Sync {
    fn fallback(&self, inv: &Invocation, cause: &CoreError) -> Result<Response, CoreError>;
}

/// 以 200 与空载荷应答。
#[derive(Clone, Copy, Debug, Default)]
pub struct ReturnNull;

impl FallbackPolicy for ReturnNull {
    fn fallback(&self, _inv: &Invocation, _cause: &CoreError) -> Result<Response, CoreError> {
        Ok(Response::with_status(StatusCode::OK))
    }
}

/// 原样返回触发降级的错误。
#[derive(Clone, Copy, Debug, Default)]
pub struct ReturnErr;

impl FallbackPolicy for ReturnErr {
    fn fallback(&self, _inv: &Invocation, cause: &CoreError) -> Result<Response, CoreError> {
        Err(cause.clone())
    }
}

/// 名称到降级策略的注册表，预置 [`RETURN_NULL`] 与 [`THROW_EXCEPTION`]。
pub struct FallbackRegistry {
    policies: RwLock<BTreeMap<String, Arc<dyn FallbackPolicy>>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        let registry = Self {
            policies: RwLock::new(BTreeMap::new()),
        };
        registry.install(RETURN_NULL, Arc::new(ReturnNull));
        registry.install(THROW_EXCEPTION, Arc::new(ReturnErr));
        registry
    }

    pub fn install(&self, name: impl Into<String>, policy: Arc<dyn FallbackPolicy>) {
        self.policies.write().insert(name.into(), policy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FallbackPolicy>, CoreError> {
        self.policies.read().get(name).cloned().ok_or_else(|| {
            CoreError::configuration(
                codes::FALLBACK_NOT_FOUND,
                format!("fallback policy `{name}` is not registered"),
            )
        })
    }
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policies = self.policies.read();
        f.debug_struct("FallbackRegistry")
            .field("policies", &policies.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_policies_are_preinstalled() {
        let registry = FallbackRegistry::new();
        let inv = Invocation::new("orders", "GetOrder");
        let cause = CoreError::admission(codes::CIRCUIT_OPEN, "Consumer.orders");

        let null = registry.get(RETURN_NULL).expect("returnnull 必须预置");
        let response = null.fallback(&inv, &cause).expect("returnnull 不应失败");
        assert_eq!(response.status, StatusCode::OK);

        let throw = registry.get(THROW_EXCEPTION).expect("throwexception 必须预置");
        let err = throw.fallback(&inv, &cause).expect_err("throwexception 透传错误");
        assert_eq!(err.code(), codes::CIRCUIT_OPEN);

        let missing = registry.get("cached").err().map(|err| err.code());
        assert_eq!(missing, Some(codes::FALLBACK_NOT_FOUND));
    }
}
