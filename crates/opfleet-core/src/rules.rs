//! Sizing rule document
//!
//! The rule document is a static YAML list of `{name, spec}` records, one per
//! operand, whose `spec` maps CR kinds to rule fragments. Presence of a key
//! at a path means tenants may influence that field; leaf markers are empty
//! strings. Decoded fresh at the start of every reconcile pass; a malformed
//! document is fatal for the pass.

use crate::error::CoreError;
use serde_json::{Map, Value};

/// Built-in sizing rules shipped with the operator.
pub const BUILTIN_SIZING_RULES: &str = r#"
- name: api-gateway
  spec:
    apiGateway:
      replicas: ''
      profile: ''
      fipsEnabled: ''
      resources:
        requests:
          cpu: ''
          memory: ''
        limits:
          cpu: ''
          memory: ''
- name: postgresql
  spec:
    cluster:
      instances: ''
      postgresql:
        parameters:
          max_connections: ''
          shared_buffers: ''
      resources:
        requests:
          cpu: ''
          memory: ''
        limits:
          cpu: ''
          memory: ''
- name: search-engine
  spec:
    searchCluster:
      replicas: ''
      resources:
        requests:
          cpu: ''
          memory: ''
        limits:
          cpu: ''
          memory: ''
"#;

/// Parsed rule document keyed by operand name.
#[derive(Debug, Clone)]
pub struct RuleSet {
    entries: Vec<Value>,
}

impl RuleSet {
    /// Decode a YAML rule document.
    pub fn from_yaml(document: &str) -> Result<Self, CoreError> {
        let entries: Vec<Value> = serde_yaml::from_str(document)
            .map_err(|e| CoreError::malformed("sizing rule", e))?;
        Ok(RuleSet { entries })
    }

    /// The built-in document text; parsed per reconcile so a bad override
    /// document surfaces the same way a bad built-in would.
    pub fn builtin_document() -> &'static str {
        BUILTIN_SIZING_RULES
    }

    /// Rule record for an operand.
    pub fn rules_for(&self, operand: &str) -> Option<&Value> {
        crate::index::find_by_name(&self.entries, operand)
    }

    /// Rule fragment governing one CR kind of an operand's spec.
    pub fn spec_rules_for_kind(&self, operand: &str, kind: &str) -> Option<&Map<String, Value>> {
        self.rules_for(operand)?
            .get("spec")?
            .get(kind)?
            .as_object()
    }
}
