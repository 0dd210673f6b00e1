//! Size-profile templates
//!
//! Named sizing presets (small, medium, large) that give each operand a
//! complete baseline. A tenant's explicit per-service overrides are composed
//! on top of the selected template with an unconditional deep merge: the
//! override wins field-by-field, the template fills everything it leaves
//! unset.

use crate::error::CoreError;
use crate::index::find_by_name;
use crate::merge::deep_merge;
use serde_json::{Map, Value};
use tracing::warn;

/// Built-in size-profile document: profile name to service-config list.
pub const BUILTIN_SIZE_PROFILES: &str = r#"
small:
  - name: api-gateway
    spec:
      apiGateway:
        replicas: 1
        resources:
          requests:
            cpu: 500m
            memory: 512Mi
          limits:
            cpu: '1'
            memory: 1Gi
  - name: postgresql
    spec:
      cluster:
        instances: 1
        postgresql:
          parameters:
            max_connections: '100'
            shared_buffers: 64MB
        resources:
          requests:
            cpu: 500m
            memory: 1Gi
          limits:
            cpu: '1'
            memory: 2Gi
  - name: search-engine
    spec:
      searchCluster:
        replicas: 1
        resources:
          requests:
            cpu: 500m
            memory: 1Gi
          limits:
            cpu: '1'
            memory: 2Gi
medium:
  - name: api-gateway
    spec:
      apiGateway:
        replicas: 2
        resources:
          requests:
            cpu: '1'
            memory: 1Gi
          limits:
            cpu: '2'
            memory: 2Gi
  - name: postgresql
    spec:
      cluster:
        instances: 2
        postgresql:
          parameters:
            max_connections: '200'
            shared_buffers: 256MB
        resources:
          requests:
            cpu: '1'
            memory: 2Gi
          limits:
            cpu: '2'
            memory: 4Gi
  - name: search-engine
    spec:
      searchCluster:
        replicas: 2
        resources:
          requests:
            cpu: '1'
            memory: 2Gi
          limits:
            cpu: '2'
            memory: 4Gi
large:
  - name: api-gateway
    spec:
      apiGateway:
        replicas: 3
        resources:
          requests:
            cpu: '2'
            memory: 2Gi
          limits:
            cpu: '4'
            memory: 4Gi
  - name: postgresql
    spec:
      cluster:
        instances: 3
        postgresql:
          parameters:
            max_connections: '400'
            shared_buffers: 1GB
        resources:
          requests:
            cpu: '2'
            memory: 4Gi
          limits:
            cpu: '4'
            memory: 8Gi
  - name: search-engine
    spec:
      searchCluster:
        replicas: 3
        resources:
          requests:
            cpu: '2'
            memory: 4Gi
          limits:
            cpu: '4'
            memory: 8Gi
"#;

/// Service-config list for a named profile, or `None` for an unknown name.
pub fn template_for(profile: &str) -> Result<Option<Vec<Value>>, CoreError> {
    let profiles: Map<String, Value> = serde_yaml::from_str(BUILTIN_SIZE_PROFILES)
        .map_err(|e| CoreError::malformed("size profile", e))?;
    match profiles.get(profile) {
        Some(Value::Array(services)) => Ok(Some(services.clone())),
        Some(_) => Ok(None),
        None => {
            warn!(profile = %profile, "unknown size profile, ignoring");
            Ok(None)
        }
    }
}

/// Compose a tenant's explicit service overrides on top of a profile
/// template. Overrides win field-by-field; template entries without an
/// override are carried verbatim; overrides for operands the template does
/// not know are appended unchanged.
pub fn compose_with_template(template: &[Value], overrides: Vec<Value>) -> Vec<Value> {
    let mut composed: Vec<Value> = Vec::with_capacity(template.len());
    for entry in template {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let merged = match find_by_name(&overrides, name) {
            Some(over) => match (entry.as_object(), over.as_object()) {
                (Some(template_map), Some(override_map)) => {
                    Value::Object(deep_merge(template_map, override_map.clone()))
                }
                _ => over.clone(),
            },
            None => entry.clone(),
        };
        composed.push(merged);
    }
    for over in overrides {
        let Some(name) = over.get("name").and_then(Value::as_str) else {
            continue;
        };
        if find_by_name(&composed, name).is_none() {
            composed.push(over);
        }
    }
    composed
}
