//! # weave-ratelimit
//!
//! 按键惰性创建的令牌桶限流：放行判定从不阻塞，配置推送以重建令牌桶的方式生效。
//! 提供端与消费端使用互不重叠的键空间，见 [`keys`]。

pub mod bucket;
pub mod keys;
pub mod limiter;

pub use bucket::TokenBucket;
pub use keys::{ConsumerKeys, ProviderKeys, enabled_key};
pub use limiter::{DEFAULT_RATE, LimiterMap};
