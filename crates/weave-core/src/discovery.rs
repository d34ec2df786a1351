//! # 服务发现与注册
//!
//! ## 核心意图（Why）
//! - 负载均衡只依赖 [`Discovery`] 获取候选实例，不感知注册中心协议；
//! - [`InstanceCache`] 是进程内实现，同时充当 [`Registrator`]，用于测试与无注册中心部署。
//!
//! ## 行为契约（What）
//! - `find_instances` 按标签过滤：实例必须包含查询中的每一个标签键值；
//! - 读取返回 `Arc` 快照，请求路径不会被注册写入阻塞太久。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::registry::FactoryRegistry;
use crate::{CoreError, ErrorCategory, codes};

/// 实例健康状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
}

/// 一个可被调用的服务实例。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_name: String,
    /// 协议名 → 地址。带端口名的协议以 `协议-端口名` 为键。
    pub endpoints: HashMap<String, String>,
    pub default_protocol: Option<String>,
    pub tags: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub status: InstanceStatus,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            service_name: service.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        let protocol = protocol.into();
        if self.default_protocol.is_none() {
            self.default_protocol = Some(protocol.clone());
        }
        self.endpoints.insert(protocol, address.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// 是否包含全部给定标签。
    pub fn matches_tags(&self, tags: &HashMap<String, String>) -> bool {
        tags.iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

/// 候选实例来源。
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn find_instances(
        &self,
        consumer_id: &str,
        service: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>, CoreError>;
}

/// 服务注册器。
#[async_trait]
pub trait Registrator: Send + Sync {
    async fn register(&self, instance: ServiceInstance) -> Result<(), CoreError>;
    async fn unregister(&self, service: &str, instance_id: &str) -> Result<(), CoreError>;
}

/// 服务注册器工厂表。
pub type RegistratorRegistry = FactoryRegistry<Arc<dyn Registrator>>;

/// 创建空的注册器工厂表。
pub fn registrator_registry() -> RegistratorRegistry {
    FactoryRegistry::new(
        "registrator",
        codes::REGISTRATOR_NOT_FOUND,
        ErrorCategory::Configuration,
    )
}

/// 进程内实例缓存。
#[derive(Debug, Default)]
pub struct InstanceCache {
    services: RwLock<HashMap<String, Arc<Vec<ServiceInstance>>>>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换某服务的实例集合。
    pub fn set_instances(&self, service: &str, instances: Vec<ServiceInstance>) {
        self.services
            .write()
            .insert(service.to_owned(), Arc::new(instances));
    }

    /// 某服务实例的快照。
    pub fn snapshot(&self, service: &str) -> Arc<Vec<ServiceInstance>> {
        self.services.read().get(service).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Discovery for InstanceCache {
    async fn find_instances(
        &self,
        _consumer_id: &str,
        service: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Vec<ServiceInstance>, CoreError> {
        let snapshot = self.snapshot(service);
        Ok(snapshot
            .iter()
            .filter(|instance| instance.matches_tags(tags))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Registrator for InstanceCache {
    async fn register(&self, instance: ServiceInstance) -> Result<(), CoreError> {
        let mut services = self.services.write();
        let entry = services.entry(instance.service_name.clone()).or_default();
        let mut instances = entry.as_ref().clone();
        instances.retain(|existing| existing.instance_id != instance.instance_id);
        instances.push(instance);
        *entry = Arc::new(instances);
        Ok(())
    }

    async fn unregister(&self, service: &str, instance_id: &str) -> Result<(), CoreError> {
        let mut services = self.services.write();
        if let Some(entry) = services.get_mut(service) {
            let instances = entry
                .iter()
                .filter(|existing| existing.instance_id != instance_id)
                .cloned()
                .collect();
            *entry = Arc::new(instances);
        }
        Ok(())
    }
}
