//! # 配置源与变更通知
//!
//! ## 核心意图（Why）
//! - 控制面与各监听器只依赖 [`ConfigSource`]：拉取键值、订阅变更；
//! - 远端配置中心的接入不在本 crate 范围内，[`MemoryConfigSource`] 提供进程内实现。
//!
//! ## 行为契约（What）
//! - 写入新键产生 `Create`，覆盖已有键产生 `Update`，删除产生 `Delete`；
//! - 通知在释放内部锁之后同步派发，监听器可以在回调中回读配置源；
//! - 监听器只接收键以其任一前缀开头的事件。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// 配置值。
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(Cow<'static, str>),
}

impl ConfigValue {
    /// 以布尔读取；文本 `"true"` / `"false"` 亦可识别。
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(value) => Some(*value),
            ConfigValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// 以整数读取；浮点截断，文本按十进制解析。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(value) => Some(*value),
            ConfigValue::Float(value) if value.is_finite() => Some(*value as i64),
            ConfigValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(value) => Some(*value as f64),
            ConfigValue::Float(value) => Some(*value),
            ConfigValue::Text(text) => text.trim().parse().ok(),
            ConfigValue::Boolean(_) => None,
        }
    }

    /// 文本形式。
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            ConfigValue::Text(text) => Cow::Borrowed(text.as_ref()),
            ConfigValue::Boolean(value) => Cow::Owned(value.to_string()),
            ConfigValue::Integer(value) => Cow::Owned(value.to_string()),
            ConfigValue::Float(value) => Cow::Owned(value.to_string()),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&'static str> for ConfigValue {
    fn from(value: &'static str) -> Self {
        ConfigValue::Text(Cow::Borrowed(value))
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Text(Cow::Owned(value))
    }
}

/// 变更类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// 单个键的变更。删除事件不携带值。
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub key: String,
    pub value: Option<ConfigValue>,
    pub kind: ChangeKind,
}

/// 配置变更监听器。
pub trait ConfigListener: Send + Sync {
    /// 关注的键前缀。
    fn prefixes(&self) -> &[&'static str];

    fn on_event(&self, event: &ChangeEvent);
}

/// 配置源。
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn subscribe(&self, listener: Arc<dyn ConfigListener>);

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(default)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.as_i64())
    }
}

/// 进程内配置源。
#[derive(Default)]
pub struct MemoryConfigSource {
    values: RwLock<BTreeMap<String, ConfigValue>>,
    listeners: RwLock<Vec<Arc<dyn ConfigListener>>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个键并通知监听器。
    pub fn set(&self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        let previous = self.values.write().insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Create
        };
        self.dispatch(ChangeEvent {
            key,
            value: Some(value),
            kind,
        });
    }

    /// 删除一个键；键不存在时不产生事件。
    pub fn remove(&self, key: &str) -> Option<ConfigValue> {
        let removed = self.values.write().remove(key)?;
        self.dispatch(ChangeEvent {
            key: key.to_owned(),
            value: None,
            kind: ChangeKind::Delete,
        });
        Some(removed)
    }

    /// 以给定前缀开头的全部键值。
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, ConfigValue)> {
        self.values
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn dispatch(&self, event: ChangeEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if listener
                .prefixes()
                .iter()
                .any(|prefix| event.key.starts_with(prefix))
            {
                debug!(key = %event.key, kind = ?event.kind, "dispatching config change");
                listener.on_event(&event);
            }
        }
    }
}

impl ConfigSource for MemoryConfigSource {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.read().get(key).cloned()
    }

    fn subscribe(&self, listener: Arc<dyn ConfigListener>) {
        self.listeners.write().push(listener);
    }
}

impl fmt::Debug for MemoryConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConfigSource")
            .field("values", &*self.values.read())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
