//! Managed topology reconciliation
//!
//! One pass reads what a Cluster owns, computes what it should own from its
//! ClusterClass, lets runtime extensions patch and veto the result, writes the
//! difference and records the outcome in status. Nothing is written before
//! every input has been read, resolved and validated.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::apply::{apply_desired_state, ApplySummary};
use crate::client::{KubeTopologyClient, TopologyClient};
use crate::config::ControllerConfig;
use crate::crd::{Cluster, Condition, ConditionStatus, TOPOLOGY_RECONCILED_CONDITION};
use crate::current_state::CurrentStateReader;
use crate::desired_state::{read_blueprint, DesiredState, ResolvedVariables};
use crate::objects::get_path;
use crate::patches::{generate_patches, validate_topology};
use crate::runtime::hooks::{
    AfterControlPlaneInitializedRequest, BeforeClusterCreateRequest, BeforeClusterUpgradeRequest,
};
use crate::runtime::{ExtensionTransport, Hook, RuntimeClient};
use crate::store::{KubeObjectStore, ObjectStore};
use crate::{Error, Result};

/// Condition reason after a pass that converged everything
pub const REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
/// Condition reason while a lifecycle hook holds a step
pub const REASON_HOOK_BLOCKING: &str = "HookBlocking";
/// Condition reason after a failed pass
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Controller context shared by every reconciliation
///
/// Immutable after construction; all collaborators sit behind traits so
/// tests can substitute them.
pub struct Context {
    /// Typed Cluster and ClusterClass access
    pub client: Arc<dyn TopologyClient>,
    /// Generated object access
    pub store: Arc<dyn ObjectStore>,
    /// Runtime extension client
    pub runtime: Arc<RuntimeClient>,
    /// Controller settings
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder from the two storage seams
    pub fn builder(client: Arc<dyn TopologyClient>, store: Arc<dyn ObjectStore>) -> ContextBuilder {
        ContextBuilder::new(client, store)
    }

    /// Context talking to the API server, calling extensions through `transport`
    pub fn from_kube(
        client: Client,
        config: ControllerConfig,
        transport: Arc<dyn ExtensionTransport>,
    ) -> Result<Self> {
        let registry = config.registry()?;
        let topology_client = KubeTopologyClient::new(client.clone(), &config.field_manager);
        let store = KubeObjectStore::new(client, &config.field_manager);
        Ok(Self::builder(Arc::new(topology_client), Arc::new(store))
            .runtime(RuntimeClient::new(transport, registry))
            .config(config)
            .build())
    }
}

/// Builder for [`Context`]
///
/// ```ignore
/// let ctx = Context::builder(client, store)
///     .runtime(RuntimeClient::new(transport, registry))
///     .config(config)
///     .build();
/// ```
pub struct ContextBuilder {
    client: Arc<dyn TopologyClient>,
    store: Arc<dyn ObjectStore>,
    runtime: Option<RuntimeClient>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Arc<dyn TopologyClient>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            client,
            store,
            runtime: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the runtime extension client (default: no extensions)
    pub fn runtime(mut self, runtime: RuntimeClient) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set controller settings
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            client: self.client,
            store: self.store,
            runtime: Arc::new(self.runtime.unwrap_or_else(RuntimeClient::without_extensions)),
            config: self.config,
        }
    }
}

/// What one successful pass did and what it is waiting for
#[derive(Debug, Default)]
struct PassOutcome {
    requeue_after: Option<Duration>,
    blocked_by: Vec<Hook>,
    hooks_called: Vec<String>,
    summary: ApplySummary,
}

impl PassOutcome {
    fn requeue_within(&mut self, wait: Duration) {
        self.requeue_after = Some(self.requeue_after.map_or(wait, |w| w.min(wait)));
    }

    fn block(&mut self, hook: Hook, wait: Duration) {
        self.blocked_by.push(hook);
        self.requeue_within(wait);
    }

    fn condition(&self) -> Condition {
        if self.blocked_by.is_empty() {
            return Condition::new(
                TOPOLOGY_RECONCILED_CONDITION,
                ConditionStatus::True,
                REASON_RECONCILE_SUCCEEDED,
                "",
            );
        }
        let hooks: Vec<&str> = self.blocked_by.iter().map(|h| h.name()).collect();
        Condition::new(
            TOPOLOGY_RECONCILED_CONDITION,
            ConditionStatus::False,
            REASON_HOOK_BLOCKING,
            format!("{} hook is blocking", hooks.join(", ")),
        )
    }

    fn action(&self) -> Action {
        match self.requeue_after {
            Some(wait) => Action::requeue(wait),
            None => Action::await_change(),
        }
    }
}

/// Reconcile the managed topology of a Cluster
///
/// Clusters that are gone, being deleted, paused or not bound to a
/// ClusterClass are left alone.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let Some(cluster) = ctx.client.get_cluster(&namespace, &name).await? else {
        debug!("cluster no longer exists");
        return Ok(Action::await_change());
    };
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!("cluster is being deleted");
        return Ok(Action::await_change());
    }
    if cluster.spec.paused {
        info!("cluster is paused, skipping");
        return Ok(Action::await_change());
    }
    if !cluster
        .spec
        .topology
        .as_ref()
        .is_some_and(|t| !t.class.is_empty())
    {
        debug!("cluster has no managed topology");
        return Ok(Action::await_change());
    }

    info!("reconciling topology");
    match reconcile_topology(&cluster, &ctx).await {
        Ok(outcome) => {
            update_status(&ctx, &cluster, outcome.condition(), &outcome.hooks_called).await?;
            info!(
                created = outcome.summary.created,
                updated = outcome.summary.updated,
                unchanged = outcome.summary.unchanged,
                deleted = outcome.summary.deleted,
                blocked = outcome.blocked_by.len(),
                "topology reconciled"
            );
            Ok(outcome.action())
        }
        Err(e) => {
            if !e.is_conflict() {
                let condition = Condition::new(
                    TOPOLOGY_RECONCILED_CONDITION,
                    ConditionStatus::False,
                    REASON_RECONCILE_FAILED,
                    e.to_string(),
                );
                if let Err(status_err) = update_status(&ctx, &cluster, condition, &[]).await {
                    warn!(error = %status_err, "failed to record reconcile failure");
                }
            }
            Err(e)
        }
    }
}

async fn reconcile_topology(cluster: &Cluster, ctx: &Context) -> Result<PassOutcome> {
    let namespace = cluster.namespace().unwrap_or_default();
    let topology = cluster
        .spec
        .topology
        .as_ref()
        .ok_or_else(|| Error::internal("reconciler", "cluster has no topology"))?;
    let class = ctx
        .client
        .get_cluster_class(&namespace, &topology.class)
        .await?
        .ok_or_else(|| Error::not_found("ClusterClass", &namespace, &topology.class))?;

    let current = CurrentStateReader::new(ctx.store.clone())
        .read(cluster, Some(&class))
        .await?;
    let variables = ResolvedVariables::resolve(cluster, &class)?;
    let mut outcome = PassOutcome::default();
    let poll = Duration::from_secs(ctx.config.poll_requeue_seconds);

    if current.is_unprovisioned() {
        let request = BeforeClusterCreateRequest {
            cluster: cluster.clone(),
        };
        let gate = ctx
            .runtime
            .call_blocking(Hook::BeforeClusterCreate, &request)
            .await?;
        if let Some(wait) = gate.retry_after {
            info!(retry_after = ?wait, "cluster creation held by extension");
            outcome.block(Hook::BeforeClusterCreate, wait);
            return Ok(outcome);
        }
    }

    let mut control_plane_version = topology.version.clone();
    if let Some(running) = current.control_plane.version() {
        if running != topology.version {
            let request = BeforeClusterUpgradeRequest {
                cluster: cluster.clone(),
                from_kubernetes_version: running.to_string(),
                to_kubernetes_version: topology.version.clone(),
            };
            let gate = ctx
                .runtime
                .call_blocking(Hook::BeforeClusterUpgrade, &request)
                .await?;
            if let Some(wait) = gate.retry_after {
                info!(
                    from = running,
                    to = %topology.version,
                    retry_after = ?wait,
                    "upgrade held by extension"
                );
                outcome.block(Hook::BeforeClusterUpgrade, wait);
                control_plane_version = running.to_string();
            }
        }
    }

    let blueprint = read_blueprint(ctx.store.as_ref(), &class).await?;
    let mut desired = DesiredState::compute(
        cluster,
        &blueprint,
        &current,
        &variables,
        &control_plane_version,
    )?;
    let patched = generate_patches(&ctx.runtime, &mut desired).await?;
    desired.finalize_templates(&current)?;
    validate_topology(&ctx.runtime, &desired).await?;
    debug!(patched, "desired state ready");

    outcome.summary = apply_desired_state(
        ctx.store.as_ref(),
        ctx.client.as_ref(),
        cluster,
        &current,
        &desired,
    )
    .await?;

    if !versions_converged(&desired, &topology.version) {
        outcome.requeue_within(poll);
    }

    let initialized_hook = Hook::AfterControlPlaneInitialized.name();
    let already_called = cluster
        .status
        .as_ref()
        .is_some_and(|s| s.lifecycle_hooks_called.iter().any(|h| h == initialized_hook));
    if !already_called {
        if current.control_plane.is_initialized() {
            let request = AfterControlPlaneInitializedRequest {
                cluster: cluster.clone(),
            };
            ctx.runtime
                .call_non_blocking(Hook::AfterControlPlaneInitialized, &request)
                .await?;
            info!("control plane initialized");
            outcome.hooks_called.push(initialized_hook.to_string());
        } else if ctx
            .runtime
            .registry()
            .for_hook(Hook::AfterControlPlaneInitialized)
            .next()
            .is_some()
        {
            outcome.requeue_within(poll);
        }
    }

    Ok(outcome)
}

/// Whether the control plane and every worker group target `version`
fn versions_converged(desired: &DesiredState, version: &str) -> bool {
    let cp = get_path(&desired.control_plane.object.data, &["spec", "version"]);
    let workers = desired.machine_deployments.values().map(|md| {
        get_path(&md.object.data, &["spec", "template", "spec", "version"])
    });
    std::iter::once(cp)
        .chain(workers)
        .all(|v| v.and_then(|v| v.as_str()) == Some(version))
}

async fn update_status(
    ctx: &Context,
    cluster: &Cluster,
    condition: Condition,
    hooks_called: &[String],
) -> Result<()> {
    let mut status = cluster.status.clone().unwrap_or_default();
    status.observed_generation = cluster.metadata.generation;
    Condition::upsert(&mut status.conditions, condition);
    for hook in hooks_called {
        if !status.lifecycle_hooks_called.contains(hook) {
            status.lifecycle_hooks_called.push(hook.clone());
        }
    }
    if cluster.status.as_ref() == Some(&status) {
        return Ok(());
    }
    ctx.client
        .patch_cluster_status(
            &cluster.namespace().unwrap_or_default(),
            &cluster.name_any(),
            &status,
        )
        .await
}

/// Decide when to retry a failed pass
///
/// Conflicts mean another writer got there first; retry almost immediately
/// and quietly.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(cluster = %cluster.name_any(), error = %error, "write conflict, requeueing");
        return Action::requeue(Duration::from_secs(ctx.config.conflict_requeue_seconds));
    }
    warn!(
        cluster = %cluster.name_any(),
        error = %error,
        retryable = error.is_retryable(),
        "topology reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(ctx.config.error_requeue_seconds))
    } else {
        // Needs a Cluster or ClusterClass change; the watches bring it back
        // sooner when one happens.
        Action::requeue(Duration::from_secs(
            ctx.config.permanent_error_requeue_seconds,
        ))
    }
}
