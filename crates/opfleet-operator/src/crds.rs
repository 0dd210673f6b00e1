//! # Custom Resource Definitions
//!
//! Kubernetes CRDs for the opfleet operator

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label carried by cloned tenant requests. Objects with this label are
/// replicas of another tenant's request and are excluded from the watch.
pub const CLONED_FROM_LABEL: &str = "opfleet.io/cloned-from";

/// TenantConfig CRD - per-tenant sizing request
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "opfleet.io",
    version = "v1alpha1",
    kind = "TenantConfig",
    plural = "tenantconfigs",
    derive = "Default",
    namespaced
)]
#[kube(status = "TenantConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct TenantConfigSpec {
    /// Named size profile (small, medium, large) used as the baseline for
    /// this tenant's service overrides.
    pub size: Option<String>,

    /// Cluster-wide sizing-mode key (for example "default" or the name of
    /// an independent autoscaling controller).
    pub profile_controller: Option<String>,

    /// Per-service sizing overrides composed on top of the size profile.
    #[serde(default)]
    pub services: Vec<ServiceOverride>,
}

/// A single service's sizing override within a tenant request.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
    /// Operand name this override targets.
    pub name: String,

    /// Controller claiming sizing authority over this operand.
    pub managed_by: Option<String>,

    /// Free-form operand spec subtree.
    #[serde(default)]
    pub spec: Map<String, Value>,

    /// Raw Kubernetes resources contributed alongside the operand, each
    /// identified by apiVersion/kind/name (and optional namespace).
    #[serde(default)]
    pub resources: Vec<Value>,
}

/// TenantConfig status
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfigStatus {
    /// Current phase
    pub phase: TenantPhase,

    /// Human-readable detail for the current phase
    pub message: Option<String>,

    /// Last update timestamp
    pub last_update: Option<String>,
}

/// TenantConfig phase
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum TenantPhase {
    #[default]
    #[serde(rename = "Pending")]
    Pending,

    #[serde(rename = "Merging")]
    Merging,

    #[serde(rename = "Succeeded")]
    Succeeded,

    #[serde(rename = "Failed")]
    Failed,
}

impl TenantConfig {
    /// The tenant's service overrides rendered as plain config trees, the
    /// shape the merge engine consumes. The size profile, when set, has
    /// already been applied by the caller; this is the raw override list.
    pub fn contributions(&self) -> Vec<Value> {
        self.spec
            .services
            .iter()
            .map(|service| {
                let mut entry = Map::new();
                entry.insert("name".to_string(), Value::String(service.name.clone()));
                if let Some(managed_by) = &service.managed_by {
                    entry.insert(
                        "managedBy".to_string(),
                        Value::String(managed_by.clone()),
                    );
                }
                if !service.spec.is_empty() {
                    entry.insert("spec".to_string(), Value::Object(service.spec.clone()));
                }
                if !service.resources.is_empty() {
                    entry.insert(
                        "resources".to_string(),
                        Value::Array(service.resources.clone()),
                    );
                }
                Value::Object(entry)
            })
            .collect()
    }

    /// Whether this object is a clone of another tenant's request.
    pub fn is_clone(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(CLONED_FROM_LABEL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tenant_config_spec_serialization() {
        let spec = TenantConfigSpec {
            size: Some("small".to_string()),
            profile_controller: Some("default".to_string()),
            services: vec![ServiceOverride {
                name: "api-gateway".to_string(),
                managed_by: None,
                spec: json!({"apiGateway": {"replicas": 3}})
                    .as_object()
                    .unwrap()
                    .clone(),
                resources: vec![],
            }],
        };

        let json = serde_json::to_string(&spec).unwrap();
        let deserialized: TenantConfigSpec = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.size.as_deref(), Some("small"));
        assert_eq!(deserialized.services.len(), 1);
        assert_eq!(deserialized.services[0].name, "api-gateway");
    }

    #[test]
    fn test_spec_uses_camel_case_on_the_wire() {
        let spec: TenantConfigSpec = serde_json::from_value(json!({
            "profileController": "turbo",
            "services": [{"name": "postgresql", "managedBy": "vpa"}]
        }))
        .unwrap();

        assert_eq!(spec.profile_controller.as_deref(), Some("turbo"));
        assert_eq!(spec.services[0].managed_by.as_deref(), Some("vpa"));
    }

    #[test]
    fn test_contributions_shape() {
        let tenant = TenantConfig::new(
            "tenant-a",
            TenantConfigSpec {
                size: None,
                profile_controller: None,
                services: vec![ServiceOverride {
                    name: "postgresql".to_string(),
                    managed_by: Some("vpa".to_string()),
                    spec: json!({"cluster": {"instances": 2}})
                        .as_object()
                        .unwrap()
                        .clone(),
                    resources: vec![json!({
                        "apiVersion": "v1",
                        "kind": "ConfigMap",
                        "name": "pg-extra"
                    })],
                }],
            },
        );

        let contributions = tenant.contributions();
        assert_eq!(contributions.len(), 1);
        let entry = &contributions[0];
        assert_eq!(entry.get("name"), Some(&json!("postgresql")));
        assert_eq!(entry.get("managedBy"), Some(&json!("vpa")));
        assert_eq!(
            entry.pointer("/spec/cluster/instances"),
            Some(&json!(2))
        );
        assert_eq!(
            entry.pointer("/resources/0/kind"),
            Some(&json!("ConfigMap"))
        );
    }

    #[test]
    fn test_tenant_status_default() {
        let status = TenantConfigStatus::default();
        assert_eq!(status.phase, TenantPhase::Pending);
        assert!(status.last_update.is_none());
    }

    #[test]
    fn test_clone_detection() {
        let mut tenant = TenantConfig::new("tenant-b", TenantConfigSpec::default());
        assert!(!tenant.is_clone());

        tenant.metadata.labels = Some(
            [(CLONED_FROM_LABEL.to_string(), "tenant-a".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(tenant.is_clone());
    }
}
