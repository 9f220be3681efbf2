//! Controller wiring
//!
//! Builds the ManagedCluster controller future: the primary watch on
//! clusters plus secondary watches on ManifestWorks and import secrets,
//! both of which map back to the cluster named by their namespace.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use cluster_import::controller::{error_policy, reconcile, Context};
use cluster_import::crd::{ManagedCluster, ManifestWork};
use cluster_import::import::IMPORT_SECRET_LABEL;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the ManagedCluster controller until a shutdown signal arrives
pub async fn run_cluster_controller(client: Client, ctx: Arc<Context>) {
    let clusters: Api<ManagedCluster> = Api::all(client.clone());
    let works: Api<ManifestWork> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);

    tracing::info!("Starting ManagedCluster controller");

    Controller::new(
        clusters,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .watches(
        works,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        |work| cluster_for_namespace(&work),
    )
    .watches(
        secrets,
        WatcherConfig::default()
            .timeout(WATCH_TIMEOUT_SECS)
            .labels(IMPORT_SECRET_LABEL),
        |secret| cluster_for_namespace(&secret),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("ManagedCluster"))
    .await;

    tracing::info!("ManagedCluster controller stopped");
}

/// Cluster namespaces are named after their cluster
fn cluster_for_namespace<K: ResourceExt>(obj: &K) -> Option<ObjectRef<ManagedCluster>> {
    obj.namespace().map(|ns| ObjectRef::new(&ns))
}

/// Creates a closure for logging reconciliation results.
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
