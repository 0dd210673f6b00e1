//! # Kubernetes Controller
//!
//! Watch loop for TenantConfig resources

use crate::crds::{TenantConfig, TenantConfigStatus, TenantPhase, CLONED_FROM_LABEL};
use crate::error::Error;
use crate::reconciler::Aggregator;
use crate::store::{ConfigStore, KubeStore};
use crate::OperatorConfig;
use futures::StreamExt;
use kube::api::{Api, PostParams, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Finalizer attached to every tenant request so that a deletion still
/// delivers a reconcile and the canonical config can shrink back down.
pub const TENANT_FINALIZER: &str = "opfleet.io/tenant-cleanup";

/// Controller for TenantConfig resources
pub struct TenantController {
    client: Client,
    config: OperatorConfig,
}

struct Context {
    client: Client,
    aggregator: Aggregator<KubeStore>,
    status: StatusUpdater,
    config: OperatorConfig,
}

impl TenantController {
    /// Create a new controller instance
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }

    /// Run the controller until the watch stream ends
    pub async fn run(self) -> Result<(), Error> {
        info!(
            namespace = %self.config.services_namespace,
            canonical = %self.config.canonical_name,
            "starting opfleet controller"
        );

        self.install_crd().await?;

        let store = Arc::new(KubeStore::new(
            self.client.clone(),
            &self.config.services_namespace,
            &self.config.canonical_name,
        ));
        let context = Arc::new(Context {
            client: self.client.clone(),
            aggregator: Aggregator::new(store, self.config.clone()),
            status: StatusUpdater::new(self.client.clone()),
            config: self.config.clone(),
        });

        let api: Api<TenantConfig> = Api::all(self.client.clone());
        // Clone-derived requests never trigger their own reconcile.
        let watch = watcher::Config::default().labels(&format!("!{CLONED_FROM_LABEL}"));

        Controller::new(api, watch)
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((object, _)) => debug!(tenant = %object.name, "reconciled"),
                    Err(err) => warn!(error = %err, "reconcile failed"),
                }
            })
            .await;

        info!("controller stream ended");
        Ok(())
    }

    /// Install the CRD if it doesn't exist
    async fn install_crd(&self) -> Result<(), Error> {
        let crd = TenantConfig::crd();
        let name = crd.name_any();
        let crds: Api<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition> =
            Api::all(self.client.clone());

        match crds.get(&name).await {
            Ok(_) => {
                info!(crd = %name, "CRD already exists");
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                info!(crd = %name, "installing CRD");
                crds.create(&PostParams::default(), &crd).await?;
                info!(crd = %name, "CRD installed");
            }
            Err(e) => return Err(Error::Kube(e)),
        }
        Ok(())
    }
}

async fn reconcile(tenant: Arc<TenantConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = tenant.name_any();

    if tenant.is_clone() {
        debug!(tenant = %name, "clone-derived request, nothing to do");
        return Ok(Action::await_change());
    }

    let namespace = tenant
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let api: Api<TenantConfig> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&api, TENANT_FINALIZER, Arc::clone(&tenant), |event| {
        let ctx = Arc::clone(&ctx);
        async move { dispatch(event, &ctx.aggregator, &ctx.config).await }
    })
    .await
    .map_err(|err| Error::Finalizer(Box::new(err)));

    // A cleanup pass removes the object; only surviving tenants carry a phase.
    if tenant.metadata.deletion_timestamp.is_none() {
        match &result {
            Ok(_) => {
                ctx.status
                    .update_phase(&tenant, TenantPhase::Succeeded, None)
                    .await;
            }
            Err(err) => {
                ctx.status
                    .update_phase(&tenant, TenantPhase::Failed, Some(err.to_string()))
                    .await;
            }
        }
    }
    result
}

/// Apply/cleanup dispatch behind the finalizer: an added or updated tenant
/// grows the canonical config, a removed tenant shrinks it back to what the
/// remaining tenants still require.
async fn dispatch<S: ConfigStore>(
    event: Event<TenantConfig>,
    aggregator: &Aggregator<S>,
    config: &OperatorConfig,
) -> Result<Action, Error> {
    match event {
        Event::Apply(tenant) => {
            info!(tenant = %tenant.name_any(), "reconciling tenant request");
            let unchanged = aggregator.apply_update(&tenant).await?;
            let interval = if unchanged {
                config.converged_requeue_secs
            } else {
                config.requeue_interval_secs
            };
            Ok(Action::requeue(Duration::from_secs(interval)))
        }
        Event::Cleanup(tenant) => {
            info!(tenant = %tenant.name_any(), "tenant deleted, shrinking canonical config");
            aggregator.apply_delete().await?;
            Ok(Action::await_change())
        }
    }
}

fn error_policy(tenant: Arc<TenantConfig>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(tenant = %tenant.name_any(), error = %err, "reconcile error, requeueing");
    Action::requeue(Duration::from_secs(ctx.config.requeue_interval_secs))
}

/// Writes tenant phase transitions to the status subresource.
pub struct StatusUpdater {
    client: Client,
}

impl StatusUpdater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Update the tenant's phase. Status writes are best-effort: a failure
    /// here must never fail the reconcile pass itself.
    pub async fn update_phase(
        &self,
        tenant: &TenantConfig,
        phase: TenantPhase,
        message: Option<String>,
    ) {
        if let Err(err) = self.try_update_phase(tenant, phase, message).await {
            warn!(tenant = %tenant.name_any(), error = %err, "status update failed");
        }
    }

    async fn try_update_phase(
        &self,
        tenant: &TenantConfig,
        phase: TenantPhase,
        message: Option<String>,
    ) -> Result<(), Error> {
        let namespace = tenant
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = tenant.name_any();
        let api: Api<TenantConfig> = Api::namespaced(self.client.clone(), &namespace);

        let mut updated = tenant.clone();
        updated.status = Some(TenantConfigStatus {
            phase,
            message,
            last_update: Some(chrono::Utc::now().to_rfc3339()),
        });

        api.replace_status(
            &name,
            &PostParams::default(),
            serde_json::to_vec(&updated)?,
        )
        .await?;
        Ok(())
    }
}
