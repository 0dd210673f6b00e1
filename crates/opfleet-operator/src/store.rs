//! Persistence adapter for the canonical fleet configuration
//!
//! The aggregation orchestrator never talks to the cluster directly; it goes
//! through [`ConfigStore`], which reads and replaces the canonical
//! OperandConfig object and lists the live tenant requests. `KubeStore` is
//! the cluster-backed implementation; `MemoryStore` backs the orchestrator
//! tests.

use crate::crds::{TenantConfig, CLONED_FROM_LABEL};
use crate::error::Error;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::Client;
use serde_json::{Map, Value};
use std::sync::Mutex;
use tracing::debug;

/// API group of the opfleet resources.
pub const API_GROUP: &str = "opfleet.io";

/// API version of the opfleet resources.
pub const API_VERSION: &str = "v1alpha1";

/// Kind of the canonical fleet-configuration object.
pub const CANONICAL_KIND: &str = "OperandConfig";

/// One read of the canonical config: the full object tree plus the resource
/// version it was read at. Writing a stale snapshot back must fail with a
/// conflict so the caller reruns the whole reconcile from a fresh fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalConfig {
    pub resource_version: Option<String>,
    pub data: Value,
}

impl CanonicalConfig {
    /// The per-operand service-config list under `spec.services`.
    pub fn services(&self) -> Vec<Value> {
        self.data
            .pointer("/spec/services")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace `spec.services`, leaving the rest of the object untouched.
    pub fn set_services(&mut self, services: Vec<Value>) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        if let Some(root) = self.data.as_object_mut() {
            let spec = root
                .entry("spec".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !spec.is_object() {
                *spec = Value::Object(Map::new());
            }
            if let Some(spec_map) = spec.as_object_mut() {
                spec_map.insert("services".to_string(), Value::Array(services));
            }
        }
    }
}

/// Cluster I/O boundary of the aggregation orchestrator.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the canonical config; absent objects are a fatal `NotFound`.
    async fn get_canonical(&self) -> Result<CanonicalConfig, Error>;

    /// Replace the canonical config in a single atomic write. Must fail with
    /// `Conflict` when the object changed since the snapshot was read.
    async fn update_canonical(&self, config: &CanonicalConfig) -> Result<(), Error>;

    /// All live tenant requests, excluding clone-derived objects.
    async fn list_tenants(&self) -> Result<Vec<TenantConfig>, Error>;
}

/// Cluster-backed store over the dynamic OperandConfig object and the
/// TenantConfig CRD.
pub struct KubeStore {
    client: Client,
    canonical: ApiResource,
    namespace: String,
    name: String,
}

impl KubeStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, CANONICAL_KIND);
        Self {
            client,
            canonical: ApiResource::from_gvk(&gvk),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn canonical_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.canonical)
    }

    fn classify(&self, err: kube::Error) -> Error {
        match err {
            kube::Error::Api(response) if response.code == 404 => Error::NotFound {
                kind: CANONICAL_KIND,
                name: self.name.clone(),
            },
            kube::Error::Api(response) if response.code == 409 => Error::Conflict {
                kind: CANONICAL_KIND,
                name: self.name.clone(),
            },
            other => Error::Kube(other),
        }
    }
}

#[async_trait]
impl ConfigStore for KubeStore {
    async fn get_canonical(&self) -> Result<CanonicalConfig, Error> {
        let object = self
            .canonical_api()
            .get(&self.name)
            .await
            .map_err(|e| self.classify(e))?;
        debug!(
            name = %self.name,
            namespace = %self.namespace,
            "fetched canonical config"
        );
        Ok(CanonicalConfig {
            resource_version: object.metadata.resource_version.clone(),
            data: object.data,
        })
    }

    async fn update_canonical(&self, config: &CanonicalConfig) -> Result<(), Error> {
        let mut object = DynamicObject::new(&self.name, &self.canonical).within(&self.namespace);
        object.metadata.resource_version = config.resource_version.clone();
        object.data = config.data.clone();
        self.canonical_api()
            .replace(&self.name, &PostParams::default(), &object)
            .await
            .map_err(|e| self.classify(e))?;
        debug!(name = %self.name, "replaced canonical config");
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantConfig>, Error> {
        let api: Api<TenantConfig> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("!{CLONED_FROM_LABEL}"));
        let tenants = api.list(&params).await?;
        Ok(tenants.items)
    }
}

/// In-memory store with the same optimistic-concurrency contract as the
/// cluster-backed one.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    canonical: Option<CanonicalConfig>,
    tenants: Vec<TenantConfig>,
    writes: u64,
}

impl MemoryStore {
    /// Seed the canonical config object.
    pub fn with_canonical(data: Value) -> Self {
        let store = MemoryStore::default();
        if let Ok(mut state) = store.state.lock() {
            state.canonical = Some(CanonicalConfig {
                resource_version: Some("1".to_string()),
                data,
            });
        }
        store
    }

    pub fn put_tenant(&self, tenant: TenantConfig) {
        if let Ok(mut state) = self.state.lock() {
            let name = tenant.metadata.name.clone();
            state
                .tenants
                .retain(|existing| existing.metadata.name != name);
            state.tenants.push(tenant);
        }
    }

    pub fn remove_tenant(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .tenants
                .retain(|existing| existing.metadata.name.as_deref() != Some(name));
        }
    }

    /// Current `spec.services` of the stored canonical config.
    pub fn canonical_services(&self) -> Vec<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.canonical.as_ref().map(CanonicalConfig::services))
            .unwrap_or_default()
    }

    /// Number of canonical writes accepted so far.
    pub fn write_count(&self) -> u64 {
        self.state.lock().map(|state| state.writes).unwrap_or(0)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_canonical(&self) -> Result<CanonicalConfig, Error> {
        let state = self.state.lock().map_err(|_| Error::MalformedObject {
            name: "memory-store".to_string(),
            reason: "poisoned lock",
        })?;
        state.canonical.clone().ok_or(Error::NotFound {
            kind: CANONICAL_KIND,
            name: "canonical".to_string(),
        })
    }

    async fn update_canonical(&self, config: &CanonicalConfig) -> Result<(), Error> {
        let mut state = self.state.lock().map_err(|_| Error::MalformedObject {
            name: "memory-store".to_string(),
            reason: "poisoned lock",
        })?;
        let stored_version = state
            .canonical
            .as_ref()
            .and_then(|c| c.resource_version.clone());
        if stored_version != config.resource_version {
            return Err(Error::Conflict {
                kind: CANONICAL_KIND,
                name: "canonical".to_string(),
            });
        }
        state.writes += 1;
        let next_version = Some((state.writes + 1).to_string());
        state.canonical = Some(CanonicalConfig {
            resource_version: next_version,
            data: config.data.clone(),
        });
        Ok(())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantConfig>, Error> {
        let state = self.state.lock().map_err(|_| Error::MalformedObject {
            name: "memory-store".to_string(),
            reason: "poisoned lock",
        })?;
        Ok(state
            .tenants
            .iter()
            .filter(|tenant| !tenant.is_clone())
            .cloned()
            .collect())
    }
}
