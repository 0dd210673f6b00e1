//! Aggregation orchestrator
//!
//! Drives one reconcile pass end to end: collects the live tenant requests,
//! resolves controller-mode ownership, applies the triggering tenant's
//! contribution directly, then recomputes the cross-tenant extreme so no
//! tenant is ever starved by another's update. The pass is a single
//! sequential read-modify-write against the canonical config; a conflicting
//! write surfaces as [`Error::Conflict`] and the whole pass is rerun from a
//! fresh fetch by the controller's requeue.

use crate::crds::TenantConfig;
use crate::error::Error;
use crate::store::{CanonicalConfig, ConfigStore};
use crate::OperatorConfig;
use opfleet_core::index::{
    find_by_name, position_by_identity, position_by_name, upsert_resources_by_name,
    upsert_spec_by_name, ResourceIdentity,
};
use opfleet_core::merge::{
    extreme_merge, filter_with_rules, merge_with_default_rules, merge_with_rules,
    reset_managed_fields, Extreme, MergePolicy,
};
use opfleet_core::modes::{
    self, independent_controllers, merge_controller_modes, ControllerModes, FALLBACK_MODE_KEY,
};
use opfleet_core::profiles::{compose_with_template, template_for};
use opfleet_core::rules::RuleSet;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates reconcile passes over a [`ConfigStore`].
pub struct Aggregator<S> {
    store: Arc<S>,
    config: OperatorConfig,
    policy: MergePolicy,
    independent: BTreeSet<String>,
}

impl<S: ConfigStore> Aggregator<S> {
    pub fn new(store: Arc<S>, config: OperatorConfig) -> Self {
        Self {
            store,
            config,
            policy: MergePolicy::default(),
            independent: independent_controllers(),
        }
    }

    /// Reconcile pass for an added or updated tenant.
    ///
    /// Returns `true` when the canonical config was already converged and
    /// nothing had to be written.
    pub async fn apply_update(&self, tenant: &TenantConfig) -> Result<bool, Error> {
        let mut canonical = self.store.get_canonical().await?;
        let snapshot = canonical.services();
        let rules = self.rule_set()?;

        let tenants = self.live_tenants().await?;
        let mut modes = self.fold_modes(&tenants);
        merge_controller_modes(&mut modes, &tenant_modes(tenant), &self.independent);

        let mut services = snapshot.clone();
        let contributions = self.tenant_services(tenant)?;
        self.apply_contributions(&mut services, &contributions, &rules, &modes);

        let services = self.aggregate_extremes(services, &tenants, &rules, &modes, Extreme::Max)?;

        self.persist_if_changed(&mut canonical, snapshot, services)
            .await
    }

    /// Reconcile pass after a tenant was removed: shrink the canonical config
    /// back to what the remaining tenants still require.
    pub async fn apply_delete(&self) -> Result<bool, Error> {
        let mut canonical = self.store.get_canonical().await?;
        let snapshot = canonical.services();
        let rules = self.rule_set()?;

        let tenants = self.live_tenants().await?;
        let modes = self.fold_modes(&tenants);

        let services =
            self.aggregate_extremes(snapshot.clone(), &tenants, &rules, &modes, Extreme::Min)?;

        self.persist_if_changed(&mut canonical, snapshot, services)
            .await
    }

    async fn persist_if_changed(
        &self,
        canonical: &mut CanonicalConfig,
        snapshot: Vec<Value>,
        services: Vec<Value>,
    ) -> Result<bool, Error> {
        if services == snapshot {
            debug!("canonical config already converged");
            return Ok(true);
        }
        canonical.set_services(services);
        self.store.update_canonical(canonical).await?;
        info!(name = %self.config.canonical_name, "canonical config updated");
        Ok(false)
    }

    fn rule_set(&self) -> Result<RuleSet, Error> {
        let document = self
            .config
            .rules_document
            .as_deref()
            .unwrap_or_else(|| RuleSet::builtin_document());
        Ok(RuleSet::from_yaml(document)?)
    }

    /// Live tenant requests in deterministic fold order, excluding clones and
    /// tenants pending deletion. The fold order matters only for fields
    /// outside the comparator allow-list, where the last tenant processed
    /// wins; sorting by (namespace, name) keeps that outcome stable across
    /// reconciles.
    async fn live_tenants(&self) -> Result<Vec<TenantConfig>, Error> {
        let mut tenants: Vec<TenantConfig> = self
            .store
            .list_tenants()
            .await?
            .into_iter()
            .filter(|tenant| !tenant.is_clone() && tenant.metadata.deletion_timestamp.is_none())
            .collect();
        tenants.sort_by(|a, b| {
            let key = |t: &TenantConfig| {
                (
                    t.metadata.namespace.clone().unwrap_or_default(),
                    t.metadata.name.clone().unwrap_or_default(),
                )
            };
            key(a).cmp(&key(b))
        });
        Ok(tenants)
    }

    fn fold_modes(&self, tenants: &[TenantConfig]) -> ControllerModes {
        let mut summary = ControllerModes::new();
        for tenant in tenants {
            merge_controller_modes(&mut summary, &tenant_modes(tenant), &self.independent);
        }
        summary
    }

    /// A tenant's service contributions with its size profile applied: the
    /// explicit overrides are composed on top of the named template, which
    /// fills everything the tenant leaves unset.
    fn tenant_services(&self, tenant: &TenantConfig) -> Result<Vec<Value>, Error> {
        let overrides = tenant.contributions();
        let Some(size) = tenant.spec.size.as_deref() else {
            return Ok(overrides);
        };
        match template_for(size)? {
            Some(template) => Ok(compose_with_template(&template, overrides)),
            None => Ok(overrides),
        }
    }

    /// Apply one tenant's contributions directly onto the canonical service
    /// list (the tenant is authoritative on this path). Operands the canonical
    /// config does not provision are skipped; an operand must pre-exist in the
    /// canonical skeleton before any tenant can influence it.
    fn apply_contributions(
        &self,
        services: &mut Vec<Value>,
        contributions: &[Value],
        rules: &RuleSet,
        modes: &ControllerModes,
    ) {
        for contribution in contributions {
            let Some(name) = contribution.get("name").and_then(Value::as_str) else {
                warn!("tenant service entry without a name, skipping");
                continue;
            };
            let Some(position) = position_by_name(services, name) else {
                debug!(operand = %name, "operand not provisioned in canonical config, skipping");
                continue;
            };
            let independent = modes::is_independent(modes, name, &self.independent);

            let canonical_spec = services[position]
                .get("spec")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let mut next_spec = canonical_spec;
            if independent {
                // Autoscaler-owned sizing fields must not survive into the
                // merge; the live autoscaled values are not ours to compare.
                let kinds: Vec<String> = next_spec.keys().cloned().collect();
                for kind in kinds {
                    if let Some(kind_map) = next_spec.get(&kind).and_then(Value::as_object) {
                        let reset = reset_managed_fields(
                            kind_map.clone(),
                            rules.spec_rules_for_kind(name, &kind),
                            &self.policy,
                        );
                        next_spec.insert(kind, Value::Object(reset));
                    }
                }
            }

            if let Some(tenant_spec) = contribution.get("spec").and_then(Value::as_object) {
                for (kind, tenant_kind_value) in tenant_spec {
                    let Some(tenant_kind) = tenant_kind_value.as_object() else {
                        warn!(
                            operand = %name,
                            kind = %kind,
                            "tenant spec fragment is not a mapping, skipping"
                        );
                        continue;
                    };
                    let Some(base) = next_spec.get(kind).and_then(Value::as_object).cloned()
                    else {
                        debug!(
                            operand = %name,
                            kind = %kind,
                            "kind absent from canonical spec, skipping"
                        );
                        continue;
                    };
                    let merged = match rules.spec_rules_for_kind(name, kind) {
                        Some(fragment) => merge_with_rules(
                            &base,
                            tenant_kind.clone(),
                            fragment,
                            true,
                            true,
                            &self.policy,
                        ),
                        None => {
                            merge_with_default_rules(&base, tenant_kind.clone(), false, &self.policy)
                        }
                    };
                    next_spec.insert(kind.clone(), Value::Object(merged));
                }
            }
            upsert_spec_by_name(services, name, Value::Object(next_spec));

            if let Some(tenant_resources) = contribution.get("resources").and_then(Value::as_array)
            {
                let mut next_resources = services[position]
                    .get("resources")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for tenant_resource in tenant_resources {
                    self.apply_resource(&mut next_resources, name, tenant_resource, true);
                }
                upsert_resources_by_name(services, name, Value::Array(next_resources));
            }
        }
    }

    /// Merge one tenant resource override into a canonical/summary resource
    /// list, matched by identity. Unmatched or incomplete entries are skipped
    /// with a warning, never fatal.
    fn apply_resource(
        &self,
        resources: &mut [Value],
        operand: &str,
        tenant_resource: &Value,
        direct_assign: bool,
    ) {
        let fallback = &self.config.services_namespace;
        let Some(identity) = ResourceIdentity::of(tenant_resource, fallback) else {
            warn!(
                operand = %operand,
                "resource override with incomplete identity, skipping"
            );
            return;
        };
        let Some(position) = position_by_identity(resources, fallback, &identity) else {
            warn!(
                operand = %operand,
                kind = %identity.kind,
                name = %identity.name,
                "resource override does not match any canonical resource, skipping"
            );
            return;
        };
        let base = resources[position]
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let Some(tenant_data) = tenant_resource.get("data").and_then(Value::as_object) else {
            warn!(
                operand = %operand,
                kind = %identity.kind,
                name = %identity.name,
                "resource override data is not a mapping, skipping"
            );
            return;
        };
        let merged = merge_with_default_rules(&base, tenant_data.clone(), direct_assign, &self.policy);
        if let Some(target) = resources[position].as_object_mut() {
            target.insert("data".to_string(), Value::Object(merged));
        }
    }

    /// Cross-tenant extreme aggregation: fold every live tenant's rule-
    /// permitted fields into one summary, then walk every canonical operand,
    /// reset autoscaler-owned fields where an independent controller holds
    /// ownership, and combine with the summary keeping the extreme value per
    /// field. The reset runs whether or not any tenant addressed the operand;
    /// the live autoscaled values are not ours to compare.
    fn aggregate_extremes(
        &self,
        mut services: Vec<Value>,
        tenants: &[TenantConfig],
        rules: &RuleSet,
        modes: &ControllerModes,
        extreme: Extreme,
    ) -> Result<Vec<Value>, Error> {
        let mut summary: Vec<Value> = Vec::new();
        for tenant in tenants {
            let contributions = self.tenant_services(tenant)?;
            self.merge_tenant_summary(&mut summary, &contributions, rules);
        }

        for position in 0..services.len() {
            let Some(name) = services[position]
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let independent = modes::is_independent(modes, &name, &self.independent);

            let mut base_spec = services[position]
                .get("spec")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if independent {
                let kinds: Vec<String> = base_spec.keys().cloned().collect();
                for kind in kinds {
                    if let Some(kind_map) = base_spec.get(&kind).and_then(Value::as_object) {
                        let reset = reset_managed_fields(
                            kind_map.clone(),
                            rules.spec_rules_for_kind(&name, &kind),
                            &self.policy,
                        );
                        base_spec.insert(kind, Value::Object(reset));
                    }
                }
            }

            let entry = find_by_name(&summary, &name);
            let summary_spec = entry
                .and_then(|e| e.get("spec"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let merged_spec = extreme_merge(base_spec, &summary_spec, extreme);
            upsert_spec_by_name(&mut services, &name, Value::Object(merged_spec));

            if let Some(summary_resources) =
                entry.and_then(|e| e.get("resources")).and_then(Value::as_array)
            {
                let mut next_resources = services[position]
                    .get("resources")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for summary_resource in summary_resources {
                    self.extreme_resource(&mut next_resources, &name, summary_resource, extreme);
                }
                upsert_resources_by_name(&mut services, &name, Value::Array(next_resources));
            }
        }
        Ok(services)
    }

    fn extreme_resource(
        &self,
        resources: &mut [Value],
        operand: &str,
        summary_resource: &Value,
        extreme: Extreme,
    ) {
        let fallback = &self.config.services_namespace;
        let Some(identity) = ResourceIdentity::of(summary_resource, fallback) else {
            return;
        };
        let Some(position) = position_by_identity(resources, fallback, &identity) else {
            warn!(
                operand = %operand,
                kind = %identity.kind,
                name = %identity.name,
                "summary resource does not match any canonical resource, skipping"
            );
            return;
        };
        let base = resources[position]
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let Some(summary_data) = summary_resource.get("data").and_then(Value::as_object) else {
            return;
        };
        let merged = extreme_merge(base, summary_data, extreme);
        if let Some(target) = resources[position].as_object_mut() {
            target.insert("data".to_string(), Value::Object(merged));
        }
    }

    /// Fold one tenant's contributions into the cross-tenant summary. Only
    /// rule-permitted fields enter the summary; conflicting allow-listed
    /// values resolve to the larger one so no tenant under-provisions
    /// another's requirement.
    fn merge_tenant_summary(
        &self,
        summary: &mut Vec<Value>,
        contributions: &[Value],
        rules: &RuleSet,
    ) {
        for contribution in contributions {
            let Some(name) = contribution.get("name").and_then(Value::as_str) else {
                warn!("tenant service entry without a name, skipping");
                continue;
            };

            let mut summary_spec = match position_by_name(summary, name) {
                Some(position) => summary[position]
                    .get("spec")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                None => Map::new(),
            };

            if let Some(tenant_spec) = contribution.get("spec").and_then(Value::as_object) {
                for (kind, tenant_kind_value) in tenant_spec {
                    let Some(tenant_kind) = tenant_kind_value.as_object() else {
                        warn!(
                            operand = %name,
                            kind = %kind,
                            "tenant spec fragment is not a mapping, skipping"
                        );
                        continue;
                    };
                    let Some(fragment) = rules.spec_rules_for_kind(name, kind) else {
                        debug!(
                            operand = %name,
                            kind = %kind,
                            "no sizing rules for kind, excluded from summary"
                        );
                        continue;
                    };
                    let merged = match summary_spec.get(kind).and_then(Value::as_object).cloned() {
                        Some(existing) => merge_with_rules(
                            &existing,
                            tenant_kind.clone(),
                            fragment,
                            false,
                            false,
                            &self.policy,
                        ),
                        None => {
                            let mut filtered = tenant_kind.clone();
                            filter_with_rules(&mut filtered, fragment);
                            filtered
                        }
                    };
                    summary_spec.insert(kind.clone(), Value::Object(merged));
                }
            }

            let mut summary_resources = match position_by_name(summary, name) {
                Some(position) => summary[position]
                    .get("resources")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            if let Some(tenant_resources) = contribution.get("resources").and_then(Value::as_array)
            {
                for tenant_resource in tenant_resources {
                    let fallback = &self.config.services_namespace;
                    let Some(identity) = ResourceIdentity::of(tenant_resource, fallback) else {
                        warn!(
                            operand = %name,
                            "resource override with incomplete identity, skipping"
                        );
                        continue;
                    };
                    if position_by_identity(&summary_resources, fallback, &identity).is_some() {
                        self.apply_resource(&mut summary_resources, name, tenant_resource, false);
                    } else {
                        summary_resources.push(tenant_resource.clone());
                    }
                }
            }

            upsert_spec_by_name(summary, name, Value::Object(summary_spec));
            upsert_resources_by_name(summary, name, Value::Array(summary_resources));
        }
    }
}

fn tenant_modes(tenant: &TenantConfig) -> ControllerModes {
    let mut modes = ControllerModes::new();
    if let Some(mode) = &tenant.spec.profile_controller {
        modes.insert(FALLBACK_MODE_KEY.to_string(), mode.clone());
    }
    for service in &tenant.spec.services {
        if let Some(managed_by) = &service.managed_by {
            modes.insert(service.name.clone(), managed_by.clone());
        }
    }
    modes
}
