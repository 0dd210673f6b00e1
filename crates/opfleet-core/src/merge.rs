//! Tree merge primitives
//!
//! Pure functions that walk two generic configuration trees (JSON objects,
//! arrays, scalars) and combine them under a sizing policy. Every function
//! takes an owned accumulator and returns it; sub-trees are never aliased
//! across two contributions. A JSON `null` is treated the same as an absent
//! key throughout, matching the wire behavior of cluster objects.

use crate::quantity;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// Which side of the comparator an extreme merge selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    /// Grow to satisfy the most demanding tenant (tenant added/updated).
    Max,
    /// Shrink back to what the remaining tenants still require (tenant removed).
    Min,
}

/// Field policy for the merge primitives.
///
/// `comparable_keys` is the allow-list of scalar sizing fields that are
/// resolved through the quantity comparator; `reset_keys` is the subset of
/// fields an independent autoscaler owns, stripped before any comparison.
/// Passed explicitly into every merge call so tests can inject their own.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    comparable_keys: BTreeSet<String>,
    reset_keys: BTreeSet<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        let comparable = [
            "replicas",
            "cpu",
            "memory",
            "profile",
            "fipsEnabled",
            "fips_enabled",
            "instances",
            "max_connections",
            "shared_buffers",
        ];
        let reset = ["replicas", "cpu", "memory"];
        MergePolicy::new(
            comparable.iter().map(|k| k.to_string()),
            reset.iter().map(|k| k.to_string()),
        )
    }
}

impl MergePolicy {
    pub fn new(
        comparable_keys: impl IntoIterator<Item = String>,
        reset_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        MergePolicy {
            comparable_keys: comparable_keys.into_iter().collect(),
            reset_keys: reset_keys.into_iter().collect(),
        }
    }

    pub fn is_comparable(&self, key: &str) -> bool {
        self.comparable_keys.contains(key)
    }

    pub fn is_reset(&self, key: &str) -> bool {
        self.reset_keys.contains(key)
    }
}

/// Shape a map holds at a key, with `null` normalized to absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Missing,
    Object,
    Array,
    Scalar,
}

fn slot(map: &Map<String, Value>, key: &str) -> Slot {
    match map.get(key) {
        None | Some(Value::Null) => Slot::Missing,
        Some(Value::Object(_)) => Slot::Object,
        Some(Value::Array(_)) => Slot::Array,
        Some(_) => Slot::Scalar,
    }
}

/// Value a map holds for a key, with `null` normalized to absent.
fn effective<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

/// Rule-filtered merge of a tenant contribution into a default tree.
///
/// When `overwrite` is false the changed tree is first pruned to the fields
/// the rule document recognizes. The default tree's fields are then folded
/// in: allow-listed scalar conflicts are resolved via the quantity comparator
/// (keeping the larger value) unless `direct_assign` makes the tenant
/// authoritative. The result has the shape of `changed` with disallowed
/// fields reverted to `default`.
pub fn merge_with_rules(
    default: &Map<String, Value>,
    mut changed: Map<String, Value>,
    rules: &Map<String, Value>,
    overwrite: bool,
    direct_assign: bool,
    policy: &MergePolicy,
) -> Map<String, Value> {
    if !overwrite {
        filter_with_rules(&mut changed, rules);
    }
    for (key, default_value) in default {
        merge_field(key, default_value, &mut changed, direct_assign, policy);
    }
    changed
}

/// Rule-filtered merge with an empty rule set (the legacy default path).
pub fn merge_with_default_rules(
    default: &Map<String, Value>,
    mut changed: Map<String, Value>,
    direct_assign: bool,
    policy: &MergePolicy,
) -> Map<String, Value> {
    for (key, default_value) in default {
        merge_field(key, default_value, &mut changed, direct_assign, policy);
    }
    changed
}

/// Recursively prune `changed` of every field the rule tree does not permit.
///
/// A key whose rule is absent is dropped; a map value whose rule is present
/// but not itself a map is a type mismatch with policy and is also dropped.
pub fn filter_with_rules(changed: &mut Map<String, Value>, rules: &Map<String, Value>) {
    let keys: Vec<String> = changed.keys().cloned().collect();
    for key in keys {
        let rule = rules.get(&key).filter(|r| !r.is_null());
        match slot(changed, &key) {
            Slot::Object => match rule {
                Some(Value::Object(rule_map)) => {
                    if let Some(Value::Object(inner)) = changed.get_mut(&key) {
                        filter_with_rules(inner, rule_map);
                    }
                }
                _ => {
                    debug!(field = %key, "dropping field not permitted by rules");
                    changed.remove(&key);
                }
            },
            Slot::Array | Slot::Scalar => {
                if rule.is_none() {
                    debug!(field = %key, "dropping field not permitted by rules");
                    changed.remove(&key);
                }
            }
            Slot::Missing => {}
        }
    }
}

fn merge_field(
    key: &str,
    default_value: &Value,
    changed: &mut Map<String, Value>,
    direct_assign: bool,
    policy: &MergePolicy,
) {
    // Reflexive no-op: equal values short-circuit before any recursion.
    if effective(changed, key) == non_null(default_value) {
        return;
    }
    match default_value {
        // Field exists only in the changed tree: changed wins.
        Value::Null => {}
        Value::Object(default_map) => match slot(changed, key) {
            Slot::Missing => {
                changed.insert(key.to_string(), default_value.clone());
            }
            Slot::Object => {
                if let Some(Value::Object(changed_map)) = changed.get_mut(key) {
                    for (inner_key, inner_default) in default_map {
                        merge_field(inner_key, inner_default, changed_map, direct_assign, policy);
                    }
                }
            }
            // Shape mismatch: the changed value stands as-is.
            _ => {}
        },
        Value::Array(default_list) => match slot(changed, key) {
            Slot::Missing => {
                changed.insert(key.to_string(), default_value.clone());
            }
            Slot::Array => {
                if let Some(Value::Array(changed_list)) = changed.get_mut(key) {
                    merge_lists(default_list, changed_list, direct_assign, policy);
                }
            }
            _ => {}
        },
        scalar => match slot(changed, key) {
            Slot::Missing => {
                changed.insert(key.to_string(), scalar.clone());
            }
            _ => {
                // Allow-listed fields are resolved through the comparator,
                // keeping the maximal value, unless the tenant is
                // authoritative; everything else keeps the changed value.
                if policy.is_comparable(key) && !direct_assign {
                    if let Some(changed_value) = effective(changed, key) {
                        let (max, _) = quantity::compare(scalar, changed_value);
                        changed.insert(key.to_string(), max);
                    }
                }
            }
        },
    }
}

/// Element-by-element merge of two lists; trailing elements missing from the
/// changed list are copied verbatim from the default.
fn merge_lists(
    default_list: &[Value],
    changed_list: &mut Vec<Value>,
    direct_assign: bool,
    policy: &MergePolicy,
) {
    for (i, default_elem) in default_list.iter().enumerate() {
        let Some(default_map) = default_elem.as_object() else {
            continue;
        };
        if changed_list.len() <= i {
            changed_list.push(default_elem.clone());
            continue;
        }
        match &mut changed_list[i] {
            Value::Object(changed_map) => {
                for (inner_key, inner_default) in default_map {
                    merge_field(inner_key, inner_default, changed_map, direct_assign, policy);
                }
            }
            other => {
                debug!(index = i, value = %other, "list element shape mismatch, keeping changed value");
            }
        }
    }
}

/// Fold a summary tree into the default tree, keeping the extreme value of
/// every scalar field present in both. Fields present only in the summary
/// are adopted unconditionally.
pub fn extreme_merge(
    mut default: Map<String, Value>,
    changed: &Map<String, Value>,
    extreme: Extreme,
) -> Map<String, Value> {
    let keys: Vec<String> = default.keys().cloned().collect();
    for key in keys {
        extreme_field(&key, changed.get(&key), &mut default, extreme);
    }
    default
}

fn extreme_field(
    key: &str,
    changed_value: Option<&Value>,
    merged: &mut Map<String, Value>,
    extreme: Extreme,
) {
    let changed_value = changed_value.and_then(non_null);
    if effective(merged, key) == changed_value {
        return;
    }
    // Summary does not address this field: the default wins.
    let Some(changed_value) = changed_value else {
        return;
    };
    match slot(merged, key) {
        Slot::Missing => {
            merged.insert(key.to_string(), changed_value.clone());
        }
        Slot::Object => {
            if let Some(changed_map) = changed_value.as_object() {
                if let Some(Value::Object(merged_map)) = merged.get_mut(key) {
                    for (inner_key, inner_changed) in changed_map {
                        extreme_field(inner_key, Some(inner_changed), merged_map, extreme);
                    }
                }
            }
        }
        Slot::Array => {
            if let Some(changed_list) = changed_value.as_array() {
                if let Some(Value::Array(merged_list)) = merged.get_mut(key) {
                    extreme_lists(changed_list, merged_list, extreme);
                }
            }
        }
        Slot::Scalar => {
            if changed_value.is_object() || changed_value.is_array() {
                debug!(field = %key, "shape mismatch in extreme merge, keeping default");
                return;
            }
            let Some(default_scalar) = effective(merged, key).cloned() else {
                return;
            };
            let (max, min) = quantity::compare(&default_scalar, changed_value);
            let pick = match extreme {
                Extreme::Max => max,
                Extreme::Min => min,
            };
            merged.insert(key.to_string(), pick);
        }
    }
}

fn extreme_lists(changed_list: &[Value], merged_list: &mut Vec<Value>, extreme: Extreme) {
    for (i, changed_elem) in changed_list.iter().enumerate() {
        let Some(changed_map) = changed_elem.as_object() else {
            continue;
        };
        if merged_list.len() <= i {
            merged_list.push(changed_elem.clone());
            continue;
        }
        if let Value::Object(merged_map) = &mut merged_list[i] {
            for (inner_key, inner_changed) in changed_map {
                extreme_field(inner_key, Some(inner_changed), merged_map, extreme);
            }
        }
    }
}

/// Unconditional deep merge: fills every field missing in `changed` from
/// `default` without overwriting anything `changed` already sets. Used for
/// size-profile template composition where there is no trust boundary.
pub fn deep_merge(
    default: &Map<String, Value>,
    mut changed: Map<String, Value>,
) -> Map<String, Value> {
    for (key, default_value) in default {
        deep_merge_field(key, default_value, &mut changed);
    }
    changed
}

fn deep_merge_field(key: &str, default_value: &Value, changed: &mut Map<String, Value>) {
    if effective(changed, key) == non_null(default_value) {
        return;
    }
    match default_value {
        Value::Null => {}
        Value::Object(default_map) => match slot(changed, key) {
            Slot::Missing => {
                changed.insert(key.to_string(), default_value.clone());
            }
            Slot::Object => {
                if let Some(Value::Object(changed_map)) = changed.get_mut(key) {
                    for (inner_key, inner_default) in default_map {
                        deep_merge_field(inner_key, inner_default, changed_map);
                    }
                }
            }
            _ => {}
        },
        Value::Array(default_list) => match slot(changed, key) {
            Slot::Missing => {
                changed.insert(key.to_string(), default_value.clone());
            }
            Slot::Array => {
                if let Some(Value::Array(changed_list)) = changed.get_mut(key) {
                    deep_merge_lists(default_list, changed_list);
                }
            }
            _ => {}
        },
        scalar => {
            if effective(changed, key).is_none() {
                changed.insert(key.to_string(), scalar.clone());
            }
        }
    }
}

fn deep_merge_lists(default_list: &[Value], changed_list: &mut Vec<Value>) {
    for (i, default_elem) in default_list.iter().enumerate() {
        let Some(default_map) = default_elem.as_object() else {
            continue;
        };
        if changed_list.len() <= i {
            changed_list.push(default_elem.clone());
        } else if let Value::Object(changed_map) = &mut changed_list[i] {
            for (inner_key, inner_default) in default_map {
                deep_merge_field(inner_key, inner_default, changed_map);
            }
        }
    }
}

/// Delete every autoscaler-owned sizing field governed by the rule tree.
///
/// Applied to a spec before comparison when an operand's sizing is under an
/// independent controller, so the live autoscaled value is never compared
/// against or overwritten by the merge engine.
pub fn reset_managed_fields(
    mut spec: Map<String, Value>,
    rules_for_kind: Option<&Map<String, Value>>,
    policy: &MergePolicy,
) -> Map<String, Value> {
    if let Some(rules) = rules_for_kind {
        reset_fields(&mut spec, rules, policy);
    }
    spec
}

fn reset_fields(map: &mut Map<String, Value>, rules: &Map<String, Value>, policy: &MergePolicy) {
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        let Some(rule) = rules.get(&key).filter(|r| !r.is_null()) else {
            continue;
        };
        match slot(map, &key) {
            Slot::Object => {
                if let Value::Object(rule_map) = rule {
                    if let Some(Value::Object(inner)) = map.get_mut(&key) {
                        reset_fields(inner, rule_map, policy);
                    }
                }
            }
            _ => {
                if policy.is_reset(&key) {
                    map.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value
            .as_object()
            .expect("test value must be an object")
            .clone()
    }

    #[test]
    fn test_rule_filtered_merge_scenario() {
        // Allow-listed cpu resolved via comparator, replicas via comparator,
        // foo dropped because the rules do not recognize it.
        let default = obj(json!({"replicas": 1, "cpu": "200m", "foo": "bar"}));
        let changed = obj(json!({"replicas": 3, "cpu": "100m", "foo": "baz"}));
        let rules = obj(json!({"replicas": "", "cpu": ""}));
        let policy = MergePolicy::default();

        let merged = merge_with_rules(&default, changed, &rules, false, false, &policy);
        assert_eq!(Value::Object(merged), json!({"replicas": 3, "cpu": "200m"}));
    }

    #[test]
    fn test_overwrite_skips_rule_filtering() {
        let default = obj(json!({"cpu": "200m"}));
        let changed = obj(json!({"cpu": "100m", "foo": "baz"}));
        let rules = obj(json!({"cpu": ""}));
        let policy = MergePolicy::default();

        let merged = merge_with_rules(&default, changed, &rules, true, true, &policy);
        assert_eq!(Value::Object(merged), json!({"cpu": "100m", "foo": "baz"}));
    }

    #[test]
    fn test_allow_list_enforcement() {
        // A scalar key outside the allow-list keeps the changed value only by
        // plain overwrite; it is never routed through the comparator.
        let default = obj(json!({"storageClass": "fast"}));
        let changed = obj(json!({"storageClass": "slow"}));
        let policy = MergePolicy::default();

        let merged = merge_with_default_rules(&default, changed, false, &policy);
        assert_eq!(merged.get("storageClass"), Some(&json!("slow")));
    }

    #[test]
    fn test_nil_changed_defaults_win() {
        let default = obj(json!({"replicas": 2, "nested": {"cpu": "1"}}));
        let changed = obj(json!({"replicas": null}));
        let policy = MergePolicy::default();

        let merged = merge_with_default_rules(&default, changed, false, &policy);
        assert_eq!(merged.get("replicas"), Some(&json!(2)));
        assert_eq!(merged.get("nested"), Some(&json!({"cpu": "1"})));
    }

    #[test]
    fn test_short_list_padding() {
        let default = obj(json!({"containers": [{"cpu": "1"}, {"cpu": "2"}, {"cpu": "3"}]}));
        let changed = obj(json!({"containers": [{"cpu": "4"}]}));
        let policy = MergePolicy::default();

        let merged = merge_with_default_rules(&default, changed, false, &policy);
        let containers = merged.get("containers").and_then(Value::as_array).unwrap();
        assert_eq!(containers.len(), 3);
        assert_eq!(containers[0], json!({"cpu": "4"}));
        assert_eq!(containers[1], json!({"cpu": "2"}));
        assert_eq!(containers[2], json!({"cpu": "3"}));
    }

    #[test]
    fn test_filter_drops_map_on_rule_type_mismatch() {
        let mut changed = obj(json!({"resources": {"cpu": "1"}}));
        let rules = obj(json!({"resources": ""}));
        filter_with_rules(&mut changed, &rules);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_filter_round_trip_absence() {
        let default = obj(json!({"replicas": 1}));
        let changed = obj(json!({"replicas": 2, "hidden": {"cpu": "9"}}));
        let rules = obj(json!({"replicas": ""}));
        let policy = MergePolicy::default();

        let merged = merge_with_rules(&default, changed, &rules, false, false, &policy);
        assert!(merged.get("hidden").is_none());
    }

    #[test]
    fn test_extreme_merge_max_and_min() {
        let default = obj(json!({"cpu": "500m", "memory": "1Gi"}));
        let changed = obj(json!({"cpu": "2", "memory": "512Mi"}));

        let grown = extreme_merge(default.clone(), &changed, Extreme::Max);
        assert_eq!(grown.get("cpu"), Some(&json!("2")));
        assert_eq!(grown.get("memory"), Some(&json!("1Gi")));

        let shrunk = extreme_merge(default, &changed, Extreme::Min);
        assert_eq!(shrunk.get("cpu"), Some(&json!("500m")));
        assert_eq!(shrunk.get("memory"), Some(&json!("512Mi")));
    }

    #[test]
    fn test_extreme_merge_adopts_new_fields() {
        let default = obj(json!({"cpu": "1"}));
        let changed = obj(json!({"cpu": "1", "memory": "2Gi"}));

        let merged = extreme_merge(default, &changed, Extreme::Min);
        assert_eq!(merged.get("memory"), Some(&json!("2Gi")));
    }

    #[test]
    fn test_extreme_merge_recurses_nested() {
        let default = obj(json!({"resources": {"requests": {"cpu": "500m"}}}));
        let changed = obj(json!({"resources": {"requests": {"cpu": "1"}}}));

        let merged = extreme_merge(default, &changed, Extreme::Max);
        assert_eq!(
            Value::Object(merged),
            json!({"resources": {"requests": {"cpu": "1"}}})
        );
    }

    #[test]
    fn test_deep_merge_fills_missing_only() {
        let default = obj(json!({"a": 1, "b": {"c": 2, "d": 3}}));
        let changed = obj(json!({"b": {"c": 9}}));

        let merged = deep_merge(&default, changed);
        assert_eq!(Value::Object(merged), json!({"b": {"c": 9, "d": 3}, "a": 1}));
    }

    #[test]
    fn test_reset_managed_fields() {
        let spec = obj(json!({
            "replicas": 3,
            "resources": {"requests": {"cpu": "1", "memory": "1Gi"}},
            "storageClass": "fast"
        }));
        let rules = obj(json!({
            "replicas": "",
            "resources": {"requests": {"cpu": "", "memory": ""}}
        }));
        let policy = MergePolicy::default();

        let reset = reset_managed_fields(spec, Some(&rules), &policy);
        assert_eq!(
            Value::Object(reset),
            json!({"resources": {"requests": {}}, "storageClass": "fast"})
        );
    }

    #[test]
    fn test_reset_ignores_unruled_fields() {
        let spec = obj(json!({"replicas": 3}));
        let rules = obj(json!({"cpu": ""}));
        let policy = MergePolicy::default();

        let reset = reset_managed_fields(spec, Some(&rules), &policy);
        assert_eq!(reset.get("replicas"), Some(&json!(3)));
    }

    #[test]
    fn test_merge_is_reflexive() {
        let tree = obj(json!({
            "replicas": 2,
            "resources": {"limits": {"cpu": "2", "memory": "4Gi"}},
            "list": [{"cpu": "1"}]
        }));
        let policy = MergePolicy::default();

        let merged = merge_with_default_rules(&tree, tree.clone(), false, &policy);
        assert_eq!(merged, tree);
    }
}
