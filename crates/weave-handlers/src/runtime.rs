//! # 运行时装配
//!
//! ## 核心意图（Why）
//! - 一个 [`Runtime`] 拥有全部注册表与治理状态（处理器、链、策略、过滤器、控制面、降级、传输、
//!   熔断器、限流器、延迟统计、调用计量），同一进程可以并存多个互不干扰的运行时；
//! - [`RuntimeBuilder`] 负责在启动期完成校验、注册与建链，请求路径只做只读查找。
//!
//! ## 逻辑解析（How）
//! 1. 校验静态配置；
//! 2. 创建 [`ConfigPanel`] 并以 `config` 之名登记，按配置中的名称解析生效控制面；
//! 3. 创建熔断器仓储、限流器表与路由规则表，并把各监听器订阅到配置源；
//! 4. 组装负载均衡器（策略、过滤器、服务发现、sidecar）；
//! 5. 先登记内置处理器，再以用户处理器覆盖同名项；
//! 6. 按配置的名称列表构建提供端与消费端的 `default` 链。
//!
//! ## 风险提示（Trade-offs）
//! - 链在构建时解析处理器实例，运行中替换处理器工厂不会影响已构建的链，需要重新 `build_chain`；
//! - 延迟统计的刷新任务须由调用方在 Tokio 运行时内显式启动。

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use weave_breaker::BreakerRegistry;
use weave_control::{
    ConfigPanel, GovernanceSettings, RouteRuleTable, install_config_panel, subscribe_listeners,
};
use weave_core::chain::{HandlerFactory, handler_registry};
use weave_core::configuration::{ConfigSource, MemoryConfigSource};
use weave_core::control::{ControlPanel, PanelRegistry, panel_registry};
use weave_core::discovery::{
    Discovery, InstanceCache, Registrator, RegistratorRegistry, ServiceInstance,
    registrator_registry,
};
use weave_core::fallback::{FallbackPolicy, FallbackRegistry};
use weave_core::time::{Clock, SystemClock};
use weave_core::transport::{Transport, TransportRegistry};
use weave_core::{
    Chain, ChainRegistry, CoreError, Endpoint, Handler, HandlerRegistry, Invocation, Response,
    Role, codes,
};
use weave_loadbalance::{
    FilterRegistry, InstanceFilter, LatencyStats, LoadBalancer, RetryCondition, Strategy,
    StrategyRegistry, filter_registry, install_builtin_strategies, strategy_registry,
};
use weave_ratelimit::LimiterMap;

use crate::handlers::{HandlerContext, install_builtin_handlers};
use crate::metrics::CallMetrics;

/// 运行时为两种角色构建的链名称。
pub const DEFAULT_CHAIN: &str = "default";
/// 进程内注册器的名称。
pub const MEMORY_REGISTRATOR: &str = "memory";

/// 运行时构造器。
pub struct RuntimeBuilder {
    settings: GovernanceSettings,
    clock: Arc<dyn Clock>,
    source: Arc<dyn ConfigSource>,
    discovery: Option<Arc<dyn Discovery>>,
    registrator: String,
    instances: Arc<InstanceCache>,
    latency: Arc<LatencyStats>,
    strategies: StrategyRegistry,
    filters: FilterRegistry,
    panels: PanelRegistry,
    registrators: RegistratorRegistry,
    fallbacks: FallbackRegistry,
    transports: TransportRegistry,
    handlers: Vec<(String, HandlerFactory)>,
}

impl RuntimeBuilder {
    /// 以静态配置创建构造器，内置策略、过滤器、降级策略与进程内注册器已登记。
    pub fn new(settings: GovernanceSettings) -> Self {
        let latency = Arc::new(LatencyStats::new());
        let strategies = strategy_registry();
        install_builtin_strategies(&strategies, Arc::clone(&latency), settings.latency.bias());

        let instances = Arc::new(InstanceCache::new());
        let registrators = registrator_registry();
        {
            let instances = Arc::clone(&instances);
            registrators.install(MEMORY_REGISTRATOR, move || {
                Arc::clone(&instances) as Arc<dyn Registrator>
            });
        }

        Self {
            settings,
            clock: Arc::new(SystemClock),
            source: Arc::new(MemoryConfigSource::new()),
            discovery: None,
            registrator: MEMORY_REGISTRATOR.to_owned(),
            instances,
            latency,
            strategies,
            filters: filter_registry(),
            panels: panel_registry(),
            registrators,
            fallbacks: FallbackRegistry::new(),
            transports: TransportRegistry::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 动态配置源；缺省为空的进程内配置源。
    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = source;
        self
    }

    /// 服务发现；缺省使用进程内实例缓存。
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// 登记并选用一个服务注册器。
    pub fn with_registrator(mut self, name: impl Into<String>, registrator: Arc<dyn Registrator>) -> Self {
        let name = name.into();
        self.registrators
            .install(name.clone(), move || Arc::clone(&registrator));
        self.registrator = name;
        self
    }

    pub fn with_transport(self, protocol: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.transports.install(protocol, transport);
        self
    }

    /// 登记处理器；与内置处理器同名时覆盖内置实现。
    pub fn with_handler<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        let factory: HandlerFactory = Arc::new(factory);
        self.handlers.push((name.into(), factory));
        self
    }

    pub fn with_strategy<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.strategies.install(name, factory);
        self
    }

    pub fn with_filter(self, name: impl Into<String>, filter: Arc<dyn InstanceFilter>) -> Self {
        self.filters.install(name, move || Arc::clone(&filter));
        self
    }

    pub fn with_fallback(self, name: impl Into<String>, policy: Arc<dyn FallbackPolicy>) -> Self {
        self.fallbacks.install(name, policy);
        self
    }

    /// 登记自定义控制面，配置中的 `panel` 指向该名称时生效。
    pub fn with_panel(self, name: impl Into<String>, panel: Arc<dyn ControlPanel>) -> Self {
        self.panels.install(name, move || Arc::clone(&panel));
        self
    }

    /// 完成装配。
    ///
    /// 配置非法、控制面或注册器未登记、链引用未知处理器时返回错误，不会留下半初始化的运行时。
    pub fn build(self) -> Result<Runtime, CoreError> {
        let RuntimeBuilder {
            settings,
            clock,
            source,
            discovery,
            registrator,
            instances,
            latency,
            strategies,
            filters,
            panels,
            registrators,
            fallbacks,
            transports,
            handlers: overrides,
        } = self;

        settings.validate()?;
        let registrator = registrators.resolve(&registrator)?;

        let panel = Arc::new(ConfigPanel::new(settings.clone(), Arc::clone(&source)));
        if !panels.contains(weave_control::DEFAULT_PANEL) {
            install_config_panel(&panels, Arc::clone(&panel));
        }
        let control = panels.resolve(&settings.panel)?;

        let breakers = Arc::new(BreakerRegistry::new(Arc::clone(&clock)));
        let limiters = Arc::new(LimiterMap::new(Arc::clone(&clock)));
        let routes = Arc::new(RouteRuleTable::from_rules(&settings.route_rule).map_err(|error| {
            CoreError::configuration(codes::CONFIG_INVALID, error.to_string()).with_cause(error)
        })?);
        subscribe_listeners(source.as_ref(), &panel, &breakers, &limiters, &routes);

        let discovery = discovery.unwrap_or_else(|| Arc::clone(&instances) as Arc<dyn Discovery>);
        let strategies = Arc::new(strategies);
        let balancer = Arc::new(
            LoadBalancer::new(discovery, Arc::clone(&strategies), Arc::new(filters))
                .with_sidecar((&settings.sidecar).into()),
        );

        let metrics = Arc::new(CallMetrics::new());
        let transports = Arc::new(transports);
        let fallbacks = Arc::new(fallbacks);
        let context = HandlerContext {
            panel: Arc::clone(&control),
            clock: Arc::clone(&clock),
            breakers: Arc::clone(&breakers),
            limiters: Arc::clone(&limiters),
            fallbacks,
            balancer,
            routes: Arc::clone(&routes),
            retry_condition: RetryCondition::parse(&settings.retry_condition),
            transports,
            latency: Arc::clone(&latency),
            metrics: Arc::clone(&metrics),
            tracing_enabled: !settings.tracing.disabled,
            access_log_enabled: settings.access_log.enabled,
        };

        let handlers = handler_registry();
        install_builtin_handlers(&handlers, &context);
        for (name, factory) in overrides {
            handlers.install(name, move || factory());
        }

        let chains = ChainRegistry::new();
        for role in [Role::Provider, Role::Consumer] {
            chains.build(role, DEFAULT_CHAIN, settings.chain(role), &handlers)?;
        }
        info!(
            panel = %settings.panel,
            provider = ?settings.chain(Role::Provider),
            consumer = ?settings.chain(Role::Consumer),
            strategies = ?strategies.names(),
            "runtime assembled"
        );

        Ok(Runtime {
            settings,
            clock,
            source,
            panel,
            control,
            handlers,
            chains,
            breakers,
            limiters,
            routes,
            latency,
            metrics,
            instances,
            registrator,
        })
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("panel", &self.settings.panel)
            .field("registrator", &self.registrator)
            .field("strategies", &self.strategies.names())
            .field("handlers", &self.handlers.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

/// 已装配的运行时。
pub struct Runtime {
    settings: GovernanceSettings,
    clock: Arc<dyn Clock>,
    source: Arc<dyn ConfigSource>,
    panel: Arc<ConfigPanel>,
    control: Arc<dyn ControlPanel>,
    handlers: HandlerRegistry,
    chains: ChainRegistry,
    breakers: Arc<BreakerRegistry>,
    limiters: Arc<LimiterMap>,
    routes: Arc<RouteRuleTable>,
    latency: Arc<LatencyStats>,
    metrics: Arc<CallMetrics>,
    instances: Arc<InstanceCache>,
    registrator: Arc<dyn Registrator>,
}

impl Runtime {
    pub fn builder(settings: GovernanceSettings) -> RuntimeBuilder {
        RuntimeBuilder::new(settings)
    }

    /// 以消费端 `default` 链发起调用。
    pub async fn call(&self, inv: &mut Invocation) -> Response {
        self.call_with_chain(DEFAULT_CHAIN, inv).await
    }

    /// 以指定名称的消费端链发起调用，链不存在时返回配置错误响应。
    pub async fn call_with_chain(&self, chain: &str, inv: &mut Invocation) -> Response {
        match self.chains.get(Role::Consumer, chain) {
            Ok(chain) => chain.execute(inv).await,
            Err(error) => Response::from_error(error),
        }
    }

    /// 以提供端 `default` 链处理入站调用，全部处理器放行后交给 `endpoint`。
    pub async fn serve(&self, inv: &mut Invocation, endpoint: &dyn Endpoint) -> Response {
        match self.chains.get(Role::Provider, DEFAULT_CHAIN) {
            Ok(chain) => chain.execute_with(inv, endpoint).await,
            Err(error) => Response::from_error(error),
        }
    }

    /// 以当前登记的处理器构建额外的具名链，同名链会被替换。
    pub fn build_chain<S: AsRef<str>>(
        &self,
        role: Role,
        name: &str,
        handler_names: &[S],
    ) -> Result<Arc<Chain>, CoreError> {
        self.chains.build(role, name, handler_names, &self.handlers)
    }

    pub fn chain(&self, role: Role, name: &str) -> Result<Arc<Chain>, CoreError> {
        self.chains.get(role, name)
    }

    /// 启动延迟统计刷新任务，须在 Tokio 运行时内调用。
    pub fn spawn_background(&self) -> JoinHandle<()> {
        Arc::clone(&self.latency).spawn_refresher(self.settings.latency.refresh_interval())
    }

    /// 经选用的注册器登记实例。
    pub async fn register_instance(&self, instance: ServiceInstance) -> Result<(), CoreError> {
        self.registrator.register(instance).await
    }

    pub async fn unregister_instance(&self, service: &str, instance_id: &str) -> Result<(), CoreError> {
        self.registrator.unregister(service, instance_id).await
    }

    pub fn settings(&self) -> &GovernanceSettings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config_source(&self) -> &Arc<dyn ConfigSource> {
        &self.source
    }

    /// 内置配置控制面，动态推送经由它生效。
    pub fn panel(&self) -> &Arc<ConfigPanel> {
        &self.panel
    }

    /// 处理器实际使用的控制面。
    pub fn control_panel(&self) -> &Arc<dyn ControlPanel> {
        &self.control
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn limiters(&self) -> &Arc<LimiterMap> {
        &self.limiters
    }

    /// 路由规则表，`weave.routeRule.<服务>` 推送经由监听器写入。
    pub fn route_rules(&self) -> &Arc<RouteRuleTable> {
        &self.routes
    }

    pub fn latency(&self) -> &Arc<LatencyStats> {
        &self.latency
    }

    pub fn metrics(&self) -> &Arc<CallMetrics> {
        &self.metrics
    }

    pub fn instance_cache(&self) -> &Arc<InstanceCache> {
        &self.instances
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("panel", &self.settings.panel)
            .field("handlers", &self.handlers.names())
            .field("chains", &self.chains)
            .field("circuits", &self.breakers.circuit_names())
            .finish()
    }
}
