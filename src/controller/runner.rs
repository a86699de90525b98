//! Controller runner - builds the topology controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use super::topology::{error_policy, reconcile, Context};
use crate::crd::{Cluster, ClusterClass};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the Cluster topology controller
///
/// Clusters are re-reconciled when their own spec changes and when the
/// ClusterClass they reference changes.
pub fn build_topology_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let clusters: Api<Cluster> = Api::all(client.clone());
    let classes: Api<ClusterClass> = Api::all(client);

    let controller = Controller::new(
        clusters,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let cluster_cache = controller.store();

    tracing::info!("- Cluster topology controller");

    Box::pin(
        controller
            .watches(
                classes,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                move |class: ClusterClass| {
                    let namespace = class.namespace();
                    let name = class.name_any();
                    let affected: Vec<ObjectRef<Cluster>> = cluster_cache
                        .state()
                        .into_iter()
                        .filter(|c| c.namespace() == namespace && uses_class(c, &name))
                        .map(|c| ObjectRef::from_obj(c.as_ref()))
                        .collect();
                    tracing::debug!(
                        class = %name,
                        affected_count = affected.len(),
                        "ClusterClass changed, triggering re-reconciliation"
                    );
                    affected
                },
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Cluster")),
    )
}

fn uses_class(cluster: &Cluster, class: &str) -> bool {
    cluster
        .spec
        .topology
        .as_ref()
        .is_some_and(|t| t.class == class)
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::cluster;

    #[test]
    fn clusters_match_their_class_by_name() {
        let cluster = cluster();
        assert!(uses_class(&cluster, "quick-start"));
        assert!(!uses_class(&cluster, "other"));
    }
}
