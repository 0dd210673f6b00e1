//! # Opfleet Kubernetes Operator
//!
//! Reconciles independently-submitted tenant sizing requests (`TenantConfig`
//! custom resources) into the single cluster-wide canonical fleet
//! configuration (`OperandConfig`), using the structural merge engine from
//! `opfleet-core`.

pub mod controller;
pub mod crds;
pub mod error;
pub mod manager;
pub mod reconciler;
pub mod store;

pub use controller::*;
pub use crds::*;
pub use error::Error;
pub use manager::*;
pub use reconciler::*;
pub use store::*;

/// Operator configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace holding the canonical fleet configuration.
    pub services_namespace: String,
    /// Name of the canonical OperandConfig object.
    pub canonical_name: String,
    /// Sizing rule document; `None` uses the built-in rules.
    pub rules_document: Option<String>,
    /// Requeue interval while the canonical config is still converging.
    pub requeue_interval_secs: u64,
    /// Requeue interval once a reconcile produced no change.
    pub converged_requeue_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            services_namespace: "opfleet-system".to_string(),
            canonical_name: "fleet-config".to_string(),
            rules_document: None,
            requeue_interval_secs: 30,
            converged_requeue_secs: 300,
        }
    }
}
