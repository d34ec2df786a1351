//! 动态治理键的解析与应用。
//!
//! 键形如 `weave.<命名空间>.<Role>[.<服务>].<字段>`（负载均衡无角色段）。
//! 服务名可含 `.`：角色之后、字段之前的全部段拼回服务名。

use weave_core::Role;
use weave_core::configuration::ConfigValue;
use weave_core::governance::BackoffKind;

use crate::settings::{CommandRule, LoadBalanceRule};

pub const CIRCUIT_BREAKER_PREFIX: &str = "weave.circuitBreaker.";
pub const ISOLATION_PREFIX: &str = "weave.isolation.";
pub const FALLBACK_PREFIX: &str = "weave.fallback.";
pub const FALLBACK_POLICY_PREFIX: &str = "weave.fallbackpolicy.";
pub const LOADBALANCE_PREFIX: &str = "weave.loadbalance.";

/// 影响熔断命令配置的键前缀。
pub const COMMAND_PREFIXES: &[&str] = &[
    CIRCUIT_BREAKER_PREFIX,
    ISOLATION_PREFIX,
    FALLBACK_PREFIX,
    FALLBACK_POLICY_PREFIX,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandField {
    Enabled,
    ForceOpen,
    ForceClosed,
    SleepWindow,
    RequestVolumeThreshold,
    ErrorThresholdPercentage,
    Timeout,
    MaxConcurrentRequests,
    FallbackEnabled,
    FallbackForce,
    FallbackPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalanceField {
    Strategy,
    Filters,
    RetryEnabled,
    RetryOnSame,
    RetryOnNext,
    BackoffKind,
    BackoffMinMs,
    BackoffMaxMs,
}

/// 解析后的动态键。`service` 为 `None` 表示角色级或全局默认。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GovernanceKey {
    Command {
        role: Role,
        service: Option<String>,
        field: CommandField,
    },
    LoadBalance {
        service: Option<String>,
        field: LoadBalanceField,
    },
}

impl GovernanceKey {
    /// 无法识别的键返回 `None`。
    pub fn parse(key: &str) -> Option<GovernanceKey> {
        if let Some(rest) = key.strip_prefix(LOADBALANCE_PREFIX) {
            let (service, field) = split_field(rest)?;
            let field = match field {
                "strategy" => LoadBalanceField::Strategy,
                "filters" => LoadBalanceField::Filters,
                "retryEnabled" => LoadBalanceField::RetryEnabled,
                "retryOnSame" => LoadBalanceField::RetryOnSame,
                "retryOnNext" => LoadBalanceField::RetryOnNext,
                "backoffKind" => LoadBalanceField::BackoffKind,
                "backoffMinMs" => LoadBalanceField::BackoffMinMs,
                "backoffMaxMs" => LoadBalanceField::BackoffMaxMs,
                _ => return None,
            };
            return Some(GovernanceKey::LoadBalance {
                service: service.map(str::to_owned),
                field,
            });
        }

        let (prefix, rest) = COMMAND_PREFIXES
            .iter()
            .find_map(|prefix| key.strip_prefix(prefix).map(|rest| (*prefix, rest)))?;
        let (role, rest) = rest.split_once('.')?;
        let role = Role::parse(role)?;
        let (service, field) = split_field(rest)?;
        let field = match (prefix, field) {
            (CIRCUIT_BREAKER_PREFIX, "enabled") => CommandField::Enabled,
            (CIRCUIT_BREAKER_PREFIX, "forceOpen") => CommandField::ForceOpen,
            (CIRCUIT_BREAKER_PREFIX, "forceClosed") => CommandField::ForceClosed,
            (CIRCUIT_BREAKER_PREFIX, "sleepWindowInMilliseconds") => CommandField::SleepWindow,
            (CIRCUIT_BREAKER_PREFIX, "requestVolumeThreshold") => {
                CommandField::RequestVolumeThreshold
            }
            (CIRCUIT_BREAKER_PREFIX, "errorThresholdPercentage") => {
                CommandField::ErrorThresholdPercentage
            }
            (ISOLATION_PREFIX, "timeoutInMilliseconds") => CommandField::Timeout,
            (ISOLATION_PREFIX, "maxConcurrentRequests") => CommandField::MaxConcurrentRequests,
            (FALLBACK_PREFIX, "enabled") => CommandField::FallbackEnabled,
            (FALLBACK_PREFIX, "force") => CommandField::FallbackForce,
            (FALLBACK_POLICY_PREFIX, "policy") => CommandField::FallbackPolicy,
            _ => return None,
        };
        Some(GovernanceKey::Command {
            role,
            service: service.map(str::to_owned),
            field,
        })
    }
}

/// 末段为字段名，其余非空部分为服务名。
fn split_field(rest: &str) -> Option<(Option<&str>, &str)> {
    match rest.rsplit_once('.') {
        Some((service, field)) if !field.is_empty() => {
            Some(((!service.is_empty()).then_some(service), field))
        }
        Some(_) => None,
        None if !rest.is_empty() => Some((None, rest)),
        None => None,
    }
}

/// 把一次变更写入规则；`value` 为 `None` 表示删除，字段回退到下层取值。
///
/// 值类型不符时返回 `false` 且不修改规则。
pub fn apply_command(rule: &mut CommandRule, field: CommandField, value: Option<&ConfigValue>) -> bool {
    fn set<T>(slot: &mut Option<T>, value: Option<&ConfigValue>, read: impl Fn(&ConfigValue) -> Option<T>) -> bool {
        match value {
            None => {
                *slot = None;
                true
            }
            Some(value) => match read(value) {
                Some(parsed) => {
                    *slot = Some(parsed);
                    true
                }
                None => false,
            },
        }
    }
    let non_negative = |value: &ConfigValue| value.as_i64().and_then(|raw| u64::try_from(raw).ok());
    match field {
        CommandField::Enabled => set(&mut rule.enabled, value, ConfigValue::as_bool),
        CommandField::ForceOpen => set(&mut rule.force_open, value, ConfigValue::as_bool),
        CommandField::ForceClosed => set(&mut rule.force_closed, value, ConfigValue::as_bool),
        CommandField::SleepWindow => set(&mut rule.sleep_window_in_milliseconds, value, non_negative),
        CommandField::RequestVolumeThreshold => {
            set(&mut rule.request_volume_threshold, value, non_negative)
        }
        CommandField::ErrorThresholdPercentage => set(&mut rule.error_threshold_percentage, value, |v| {
            non_negative(v).and_then(|raw| u32::try_from(raw).ok())
        }),
        CommandField::Timeout => set(&mut rule.timeout_in_milliseconds, value, non_negative),
        CommandField::MaxConcurrentRequests => set(&mut rule.max_concurrent_requests, value, |v| {
            non_negative(v).and_then(|raw| usize::try_from(raw).ok())
        }),
        CommandField::FallbackEnabled => set(&mut rule.fallback_enabled, value, ConfigValue::as_bool),
        CommandField::FallbackForce => set(&mut rule.fallback_force, value, ConfigValue::as_bool),
        CommandField::FallbackPolicy => set(&mut rule.fallback_policy, value, |v| {
            Some(v.as_text().trim().to_ascii_lowercase())
        }),
    }
}

/// 负载均衡规则版本的 [`apply_command`]。`filters` 以逗号分隔。
pub fn apply_load_balance(
    rule: &mut LoadBalanceRule,
    field: LoadBalanceField,
    value: Option<&ConfigValue>,
) -> bool {
    fn set<T>(slot: &mut Option<T>, value: Option<&ConfigValue>, read: impl Fn(&ConfigValue) -> Option<T>) -> bool {
        match value.map(read) {
            None => {
                *slot = None;
                true
            }
            Some(Some(parsed)) => {
                *slot = Some(parsed);
                true
            }
            Some(None) => false,
        }
    }
    let count = |value: &ConfigValue| value.as_i64().and_then(|raw| u32::try_from(raw).ok());
    let millis = |value: &ConfigValue| value.as_i64().and_then(|raw| u64::try_from(raw).ok());
    match field {
        LoadBalanceField::Strategy => set(&mut rule.strategy, value, |v| {
            Some(v.as_text().trim().to_owned()).filter(|name| !name.is_empty())
        }),
        LoadBalanceField::Filters => set(&mut rule.filters, value, |v| {
            Some(
                v.as_text()
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect(),
            )
        }),
        LoadBalanceField::RetryEnabled => set(&mut rule.retry_enabled, value, ConfigValue::as_bool),
        LoadBalanceField::RetryOnSame => set(&mut rule.retry_on_same, value, count),
        LoadBalanceField::RetryOnNext => set(&mut rule.retry_on_next, value, count),
        LoadBalanceField::BackoffKind => set(&mut rule.backoff_kind, value, |v| {
            BackoffKind::parse(v.as_text().trim())
        }),
        LoadBalanceField::BackoffMinMs => set(&mut rule.backoff_min_ms, value, millis),
        LoadBalanceField::BackoffMaxMs => set(&mut rule.backoff_max_ms, value, millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_level_service_level_and_dotted_service_keys() {
        assert_eq!(
            GovernanceKey::parse("weave.circuitBreaker.Consumer.requestVolumeThreshold"),
            Some(GovernanceKey::Command {
                role: Role::Consumer,
                service: None,
                field: CommandField::RequestVolumeThreshold,
            })
        );
        assert_eq!(
            GovernanceKey::parse("weave.isolation.Provider.billing.v2.timeoutInMilliseconds"),
            Some(GovernanceKey::Command {
                role: Role::Provider,
                service: Some("billing.v2".to_owned()),
                field: CommandField::Timeout,
            })
        );
        assert_eq!(
            GovernanceKey::parse("weave.loadbalance.orders.strategy"),
            Some(GovernanceKey::LoadBalance {
                service: Some("orders".to_owned()),
                field: LoadBalanceField::Strategy,
            })
        );
        assert_eq!(
            GovernanceKey::parse("weave.loadbalance.retryOnNext"),
            Some(GovernanceKey::LoadBalance {
                service: None,
                field: LoadBalanceField::RetryOnNext,
            })
        );
    }

    #[test]
    fn unknown_roles_fields_and_namespaces_are_ignored() {
        for key in [
            "weave.circuitBreaker.Gateway.enabled",
            "weave.circuitBreaker.Consumer.orders.bogus",
            "weave.fallback.Consumer.orders.policy",
            "weave.loadbalance.",
            "weave.flowcontrol.Consumer.qps.limit.orders",
        ] {
            assert_eq!(GovernanceKey::parse(key), None, "不应识别：{key}");
        }
    }

    #[test]
    fn applying_and_deleting_fields() {
        let mut rule = CommandRule::default();
        assert!(apply_command(&mut rule, CommandField::ForceOpen, Some(&ConfigValue::from("true"))));
        assert_eq!(rule.force_open, Some(true));
        assert!(!apply_command(
            &mut rule,
            CommandField::RequestVolumeThreshold,
            Some(&ConfigValue::from(-3i64))
        ), "负数被拒绝");
        assert_eq!(rule.request_volume_threshold, None);
        assert!(apply_command(&mut rule, CommandField::ForceOpen, None));
        assert_eq!(rule.force_open, None);

        let mut lb = LoadBalanceRule::default();
        assert!(apply_load_balance(
            &mut lb,
            LoadBalanceField::Filters,
            Some(&ConfigValue::from("status, zone"))
        ));
        assert_eq!(lb.filters, Some(vec!["status".to_owned(), "zone".to_owned()]));
        assert!(!apply_load_balance(
            &mut lb,
            LoadBalanceField::BackoffKind,
            Some(&ConfigValue::from("linear"))
        ));
    }
}
