//! Lookup of named items in lists of configuration objects
//!
//! Service configs are matched by name; embedded resource overrides by the
//! (namespace, apiVersion, kind, name) tuple. All lookups are linear scans;
//! the lists hold tens of operands, not thousands.

use serde_json::{json, Value};

/// Logical identity of an embedded resource override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceIdentity {
    /// Extract the identity of a resource override, defaulting the namespace
    /// to `fallback_namespace` when the item omits it. Returns `None` when
    /// apiVersion, kind, or name is missing or empty.
    pub fn of(resource: &Value, fallback_namespace: &str) -> Option<Self> {
        let map = resource.as_object()?;
        let field = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let identity = ResourceIdentity {
            api_version: field("apiVersion")?,
            kind: field("kind")?,
            name: field("name")?,
            namespace: field("namespace").unwrap_or_else(|| fallback_namespace.to_string()),
        };
        Some(identity)
    }
}

/// Find an item whose `name` field matches.
pub fn find_by_name<'a>(items: &'a [Value], name: &str) -> Option<&'a Value> {
    items
        .iter()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
}

/// Position of an item whose `name` field matches.
pub fn position_by_name(items: &[Value], name: &str) -> Option<usize> {
    items
        .iter()
        .position(|item| item.get("name").and_then(Value::as_str) == Some(name))
}

fn identity_matches(item: &Value, fallback_namespace: &str, identity: &ResourceIdentity) -> bool {
    let field = |key: &str| item.get(key).and_then(Value::as_str);
    if field("apiVersion") != Some(&identity.api_version)
        || field("kind") != Some(&identity.kind)
        || field("name") != Some(&identity.name)
    {
        return false;
    }
    match field("namespace") {
        Some(ns) => ns == identity.namespace,
        None => fallback_namespace == identity.namespace,
    }
}

/// Find a resource override by its full identity. An item without an explicit
/// namespace matches when `fallback_namespace` equals the wanted namespace.
pub fn find_by_identity<'a>(
    items: &'a [Value],
    fallback_namespace: &str,
    identity: &ResourceIdentity,
) -> Option<&'a Value> {
    items
        .iter()
        .find(|item| identity_matches(item, fallback_namespace, identity))
}

/// Position of a resource override with the given identity.
pub fn position_by_identity(
    items: &[Value],
    fallback_namespace: &str,
    identity: &ResourceIdentity,
) -> Option<usize> {
    items
        .iter()
        .position(|item| identity_matches(item, fallback_namespace, identity))
}

/// Replace the `spec` of the named item in place, or append a new stub.
pub fn upsert_spec_by_name(items: &mut Vec<Value>, name: &str, spec: Value) {
    match position_by_name(items, name) {
        Some(i) => {
            if let Some(map) = items[i].as_object_mut() {
                map.insert("spec".to_string(), spec);
            }
        }
        None => items.push(json!({"name": name, "spec": spec})),
    }
}

/// Replace the `resources` of the named item in place, or append a new stub.
pub fn upsert_resources_by_name(items: &mut Vec<Value>, name: &str, resources: Value) {
    match position_by_name(items, name) {
        Some(i) => {
            if let Some(map) = items[i].as_object_mut() {
                map.insert("resources".to_string(), resources);
            }
        }
        None => items.push(json!({"name": name, "resources": resources})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_name() {
        let items = vec![json!({"name": "a", "spec": {}}), json!({"name": "b"})];
        assert!(find_by_name(&items, "b").is_some());
        assert!(find_by_name(&items, "c").is_none());
    }

    #[test]
    fn test_identity_requires_core_fields() {
        let missing_kind = json!({"apiVersion": "v1", "name": "cm"});
        assert!(ResourceIdentity::of(&missing_kind, "ns").is_none());

        let empty_kind = json!({"apiVersion": "v1", "kind": "", "name": "cm"});
        assert!(ResourceIdentity::of(&empty_kind, "ns").is_none());

        let complete = json!({"apiVersion": "v1", "kind": "ConfigMap", "name": "cm"});
        let identity = ResourceIdentity::of(&complete, "fleet-ns").unwrap();
        assert_eq!(identity.namespace, "fleet-ns");
    }

    #[test]
    fn test_find_by_identity_with_namespace_fallback() {
        let items = vec![
            json!({"apiVersion": "v1", "kind": "ConfigMap", "name": "cm"}),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "name": "cm", "namespace": "other"}),
        ];
        let wanted = ResourceIdentity {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "cm".to_string(),
            namespace: "fleet-ns".to_string(),
        };
        let found = find_by_identity(&items, "fleet-ns", &wanted).unwrap();
        assert!(found.get("namespace").is_none());

        let other = ResourceIdentity {
            namespace: "other".to_string(),
            ..wanted
        };
        let found = find_by_identity(&items, "fleet-ns", &other).unwrap();
        assert_eq!(found.get("namespace"), Some(&json!("other")));
    }

    #[test]
    fn test_upsert_spec_by_name() {
        let mut items = vec![json!({"name": "a", "spec": {"old": 1}})];
        upsert_spec_by_name(&mut items, "a", json!({"new": 2}));
        assert_eq!(items[0].get("spec"), Some(&json!({"new": 2})));

        upsert_spec_by_name(&mut items, "b", json!({}));
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("name"), Some(&json!("b")));
    }
}
