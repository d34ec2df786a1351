//! # 路由规则（灰度发布）
//!
//! ## 核心意图（Why）
//! - 按调用来源与请求头，把一部分流量引到带特定标签的实例子集（例如 `version = v2`），
//!   负载均衡随后只在该子集内选址。
//!
//! ## 契约说明（What）
//! - 每个目标服务对应一组 [`RouteRule`]，按 `precedence` 降序匹配，命中第一条即停止；
//! - 一条规则内各路由的权重之和不得超过 100，剩余份额走缺省路由（不附加标签）；
//! - 静态规则来自 `[routeRule.<服务>]`，动态规则以 `weave.routeRule.<服务>` 推送 TOML 文本。
//!
//! ## 逻辑解析（How）
//! - 规则表置于读写锁之后：请求路径只取读锁，推送整体替换某个服务的规则；
//! - 权重按已分配份额确定性地分流：第 n 次命中时，选择第一个“已分配次数 × 100 < 权重 × n”的路由，
//!   短窗口内的实际比例即贴近配置比例。
//!
//! ## 风险提示（Trade-offs）
//! - 分流计数在规则替换时清零，替换瞬间的比例会有短暂偏差。

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use weave_core::Invocation;
use weave_core::configuration::{ChangeEvent, ChangeKind, ConfigListener};

/// 动态路由规则的键前缀，后接目标服务名。
pub const ROUTE_RULE_PREFIX: &str = "weave.routeRule.";

/// 规则非法的原因。
#[derive(Debug, Error)]
pub enum RouteRuleError {
    #[error("route rule for `{service}` weighs {total}%, over 100%")]
    WeightOverflow { service: String, total: u32 },
    #[error("route rule for `{service}` is malformed")]
    Malformed {
        service: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 单条路由规则。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteRule {
    pub precedence: i32,
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    #[serde(rename = "route")]
    pub routes: Vec<RouteTag>,
}

/// 规则的匹配条件；未给出的条件视为满足。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleMatch {
    pub source: Option<String>,
    pub source_tags: BTreeMap<String, String>,
    pub headers: BTreeMap<String, HeaderCondition>,
}

/// 带权重的目标标签。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteTag {
    pub weight: u32,
    pub tags: BTreeMap<String, String>,
}

/// 请求头条件；大小比较两侧都须能解析为数字。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderCondition {
    Exact(String),
    NoEqu(String),
    Less(String),
    Greater(String),
    NoLess(String),
    NoGreater(String),
}

impl HeaderCondition {
    pub fn accepts(&self, actual: &str) -> bool {
        let numeric = |expected: &str, accept: fn(f64, f64) -> bool| {
            match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
                (Ok(actual), Ok(expected)) => accept(actual, expected),
                _ => false,
            }
        };
        match self {
            HeaderCondition::Exact(expected) => actual == expected,
            HeaderCondition::NoEqu(expected) => actual != expected,
            HeaderCondition::Less(expected) => numeric(expected.as_str(), |a, e| a < e),
            HeaderCondition::Greater(expected) => numeric(expected.as_str(), |a, e| a > e),
            HeaderCondition::NoLess(expected) => numeric(expected.as_str(), |a, e| a >= e),
            HeaderCondition::NoGreater(expected) => numeric(expected.as_str(), |a, e| a <= e),
        }
    }
}

impl RuleMatch {
    /// 来源服务名、来源标签与请求头全部满足时命中。
    pub fn matches(
        &self,
        source: &str,
        source_tags: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> bool {
        if self.source.as_deref().is_some_and(|expected| expected != source) {
            return false;
        }
        self.source_tags
            .iter()
            .all(|(key, value)| source_tags.get(key) == Some(value))
            && self.headers.iter().all(|(name, condition)| {
                headers
                    .get(name)
                    .is_some_and(|actual| condition.accepts(actual))
            })
    }
}

/// 校验一个服务的全部规则。
pub fn validate_rules(service: &str, rules: &[RouteRule]) -> Result<(), RouteRuleError> {
    for rule in rules {
        let total: u32 = rule
            .routes
            .iter()
            .fold(0u32, |total, route| total.saturating_add(route.weight));
        if total > 100 {
            return Err(RouteRuleError::WeightOverflow {
                service: service.to_owned(),
                total,
            });
        }
    }
    Ok(())
}

/// 推送值的文档形式：`[[rules]]` 数组。
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleDocument {
    rules: Vec<RouteRule>,
}

/// 解析推送的 TOML 文本并校验。
pub fn parse_rules(service: &str, raw: &str) -> Result<Vec<RouteRule>, RouteRuleError> {
    let document: RuleDocument =
        toml::from_str(raw).map_err(|source| RouteRuleError::Malformed {
            service: service.to_owned(),
            source,
        })?;
    validate_rules(service, &document.rules)?;
    Ok(document.rules)
}

#[derive(Debug, Default)]
struct Shares {
    total: u64,
    assigned: Vec<u64>,
}

/// 路由规则表。
#[derive(Debug, Default)]
pub struct RouteRuleTable {
    rules: RwLock<HashMap<String, Arc<[RouteRule]>>>,
    shares: Mutex<HashMap<(String, usize), Shares>>,
}

impl RouteRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以静态配置初始化；任一服务的规则非法时整体失败。
    pub fn from_rules(rules: &BTreeMap<String, Vec<RouteRule>>) -> Result<Self, RouteRuleError> {
        let table = Self::new();
        for (service, rules) in rules {
            table.set_rules(service, rules.clone())?;
        }
        Ok(table)
    }

    /// 整体替换某个服务的规则，非法时保留原规则。
    pub fn set_rules(&self, service: &str, mut rules: Vec<RouteRule>) -> Result<(), RouteRuleError> {
        validate_rules(service, &rules)?;
        rules.sort_by_key(|rule| Reverse(rule.precedence));
        self.rules.write().insert(service.to_owned(), rules.into());
        self.shares.lock().retain(|(owner, _), _| owner != service);
        Ok(())
    }

    pub fn remove_rules(&self, service: &str) -> bool {
        let removed = self.rules.write().remove(service).is_some();
        self.shares.lock().retain(|(owner, _), _| owner != service);
        removed
    }

    pub fn rules(&self, service: &str) -> Option<Arc<[RouteRule]>> {
        self.rules.read().get(service).cloned()
    }

    /// 为调用挑选目标标签；无规则、未命中或落入缺省份额时返回 `None`。
    pub fn route(
        &self,
        inv: &Invocation,
        source_tags: &HashMap<String, String>,
    ) -> Option<BTreeMap<String, String>> {
        let rules = self.rules(&inv.microservice_name)?;
        let headers = inv.context.headers();
        let (index, rule) = rules.iter().enumerate().find(|(_, rule)| {
            rule.matcher
                .matches(&inv.source_microservice, source_tags, &headers)
        })?;
        self.fit(&inv.microservice_name, index, &rule.routes)
            .map(|route| route.tags.clone())
    }

    fn fit<'a>(&self, service: &str, index: usize, routes: &'a [RouteTag]) -> Option<&'a RouteTag> {
        if let Some(first) = routes.first() {
            if first.weight >= 100 {
                return Some(first);
            }
        }
        let mut shares = self.shares.lock();
        let shares = shares.entry((service.to_owned(), index)).or_default();
        if shares.assigned.len() != routes.len() {
            shares.assigned = vec![0; routes.len()];
        }
        shares.total += 1;
        for (route, assigned) in routes.iter().zip(shares.assigned.iter_mut()) {
            if *assigned * 100 < u64::from(route.weight) * shares.total {
                *assigned += 1;
                return Some(route);
            }
        }
        None
    }
}

/// 路由规则推送的监听器：创建与更新替换规则，删除移除规则，非法规则被忽略。
pub struct RouteRuleListener {
    table: Arc<RouteRuleTable>,
}

impl RouteRuleListener {
    pub fn new(table: Arc<RouteRuleTable>) -> Self {
        Self { table }
    }
}

impl ConfigListener for RouteRuleListener {
    fn prefixes(&self) -> &[&'static str] {
        &[ROUTE_RULE_PREFIX]
    }

    fn on_event(&self, event: &ChangeEvent) {
        let Some(service) = event.key.strip_prefix(ROUTE_RULE_PREFIX) else {
            return;
        };
        match (event.kind, &event.value) {
            (ChangeKind::Create | ChangeKind::Update, Some(value)) => {
                let applied = parse_rules(service, &value.as_text())
                    .and_then(|rules| self.table.set_rules(service, rules));
                match applied {
                    Ok(()) => info!(service, "route rules refreshed"),
                    Err(error) => warn!(service, error = %error, "route rules rejected"),
                }
            }
            (ChangeKind::Delete, _) => {
                let removed = self.table.remove_rules(service);
                debug!(service, removed, "route rules removed");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::InvocationContext;

    fn tag(weight: u32, version: &str) -> RouteTag {
        RouteTag {
            weight,
            tags: [("version".to_owned(), version.to_owned())].into(),
        }
    }

    fn call() -> Invocation {
        Invocation::new("orders", "GetOrder").with_source("gateway")
    }

    fn version(table: &RouteRuleTable, inv: &Invocation) -> Option<String> {
        table
            .route(inv, &HashMap::new())
            .and_then(|tags| tags.get("version").cloned())
    }

    #[test]
    fn weights_over_hundred_are_rejected_and_old_rules_kept() {
        let table = RouteRuleTable::new();
        let valid = RouteRule {
            routes: vec![tag(100, "v1")],
            ..RouteRule::default()
        };
        table.set_rules("orders", vec![valid]).expect("合法规则");

        let overweight = RouteRule {
            routes: vec![tag(60, "v1"), tag(50, "v2")],
            ..RouteRule::default()
        };
        let error = table
            .set_rules("orders", vec![overweight])
            .expect_err("权重合计 110% 非法");
        assert!(matches!(error, RouteRuleError::WeightOverflow { total: 110, .. }));
        assert_eq!(version(&table, &call()).as_deref(), Some("v1"), "原规则仍生效");
    }

    #[test]
    fn highest_precedence_matching_rule_wins() {
        let table = RouteRuleTable::new();
        let fallback = RouteRule {
            precedence: 1,
            routes: vec![tag(100, "v1")],
            ..RouteRule::default()
        };
        let canary = RouteRule {
            precedence: 5,
            matcher: RuleMatch {
                headers: [("x-user".to_owned(), HeaderCondition::Exact("alice".to_owned()))].into(),
                ..RuleMatch::default()
            },
            routes: vec![tag(100, "v2")],
        };
        table.set_rules("orders", vec![fallback, canary]).expect("合法规则");

        let mut context = InvocationContext::default();
        context.insert("x-user", "alice");
        let alice = call().with_context(context);
        assert_eq!(version(&table, &alice).as_deref(), Some("v2"));
        assert_eq!(version(&table, &call()).as_deref(), Some("v1"), "头不满足时落到低优先级规则");
        assert_eq!(version(&table, &Invocation::new("payments", "Pay")), None, "无规则的服务");
    }

    #[test]
    fn partial_weights_split_traffic_and_leave_default_share() {
        let table = RouteRuleTable::new();
        let rule = RouteRule {
            routes: vec![tag(50, "v2"), tag(25, "v3")],
            ..RouteRule::default()
        };
        table.set_rules("orders", vec![rule]).expect("合法规则");

        let picks: Vec<Option<String>> = (0..8).map(|_| version(&table, &call())).collect();
        let count = |wanted: Option<&str>| picks.iter().filter(|pick| pick.as_deref() == wanted).count();
        assert_eq!(count(Some("v2")), 4);
        assert_eq!(count(Some("v3")), 2);
        assert_eq!(count(None), 2, "剩余 25% 走缺省路由");
    }

    #[test]
    fn source_and_numeric_header_conditions() {
        let matcher = RuleMatch {
            source: Some("gateway".to_owned()),
            source_tags: [("zone".to_owned(), "az1".to_owned())].into(),
            headers: [("x-age".to_owned(), HeaderCondition::NoLess("18".to_owned()))].into(),
        };
        let tags: HashMap<String, String> = [("zone".to_owned(), "az1".to_owned())].into();
        let adult: HashMap<String, String> = [("x-age".to_owned(), "30".to_owned())].into();
        let minor: HashMap<String, String> = [("x-age".to_owned(), "12".to_owned())].into();
        let garbled: HashMap<String, String> = [("x-age".to_owned(), "old".to_owned())].into();

        assert!(matcher.matches("gateway", &tags, &adult));
        assert!(!matcher.matches("gateway", &tags, &minor));
        assert!(!matcher.matches("gateway", &tags, &garbled), "非数字不满足大小比较");
        assert!(!matcher.matches("billing", &tags, &adult));
        assert!(!matcher.matches("gateway", &HashMap::new(), &adult));
    }

    #[test]
    fn listener_applies_pushes_and_deletes() {
        let table = Arc::new(RouteRuleTable::new());
        let listener = RouteRuleListener::new(Arc::clone(&table));
        let key = format!("{ROUTE_RULE_PREFIX}orders");
        let push = |raw: &'static str, kind| ChangeEvent {
            key: key.clone(),
            value: Some(raw.into()),
            kind,
        };

        listener.on_event(&push(
            "[[rules]]\nprecedence = 1\n[[rules.route]]\nweight = 100\ntags = { version = \"v2\" }\n",
            ChangeKind::Create,
        ));
        assert_eq!(version(&table, &call()).as_deref(), Some("v2"));

        listener.on_event(&push("[[rules]]\nroute = 7\n", ChangeKind::Update));
        assert_eq!(version(&table, &call()).as_deref(), Some("v2"), "解析失败的推送被忽略");

        listener.on_event(&ChangeEvent {
            key: key.clone(),
            value: None,
            kind: ChangeKind::Delete,
        });
        assert!(table.rules("orders").is_none());
    }
}
