//! Artifact lifecycle state machine
//!
//! For one cluster, decides whether the cleanup finalizer must be present
//! and, once the cluster is being removed, tears its artifacts down in
//! order: other works first, then the agent once it was confirmed applied,
//! then the CRDs once the agent is gone. Local and offline clusters skip
//! the ordering and are force-cleaned in a single pass.
//!
//! The reconciler reads a fresh snapshot on every call and carries no state
//! between calls. Any failed write aborts the pass; the controller runtime
//! redelivers it and the next pass recomputes everything.

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::store::WorkStore;
use crate::artifact::ArtifactSet;
use crate::crd::{ConditionStatus, ManagedCluster, ManifestWork};
use crate::Error;

/// Finalizer held on a ManagedCluster while it has artifacts
pub const CLEANUP_FINALIZER: &str = "cluster.open-cluster-management.io/manifest-work-cleanup";

/// Whether a deleting cluster's artifacts are removed without ordering
///
/// The hub's own cluster and clusters observed offline cannot be waited on:
/// no agent will ever confirm anything, so every artifact goes at once.
pub fn force_cleanup(cluster: &ManagedCluster) -> bool {
    cluster.is_local() || cluster.is_offline()
}

/// Run one reconciliation pass for the named cluster
#[instrument(skip(store), fields(cluster = %name))]
pub async fn reconcile_cluster(name: &str, store: &dyn WorkStore) -> Result<(), Error> {
    let Some(cluster) = store.get_cluster(name).await? else {
        // Orphaned works are garbage collected through their owner reference
        debug!("cluster not found");
        return Ok(());
    };

    let works = store.list_works(name).await?;
    let artifacts = ArtifactSet::partition(name, works);

    if cluster.is_deleting() {
        cleanup(&cluster, &artifacts, store).await
    } else {
        sync_finalizer(&cluster, &artifacts, store).await
    }
}

/// Keep the finalizer present exactly while artifacts exist
async fn sync_finalizer(
    cluster: &ManagedCluster,
    artifacts: &ArtifactSet,
    store: &dyn WorkStore,
) -> Result<(), Error> {
    let has_finalizer = cluster.has_finalizer(CLEANUP_FINALIZER);

    match (artifacts.is_empty(), has_finalizer) {
        (true, true) => {
            info!("no artifacts to supervise, removing finalizer");
            store
                .remove_cluster_finalizer(cluster, CLEANUP_FINALIZER)
                .await
        }
        (false, false) => {
            info!(artifacts = artifacts.len(), "artifacts present, adding finalizer");
            store.add_cluster_finalizer(cluster, CLEANUP_FINALIZER).await
        }
        _ => Ok(()),
    }
}

async fn cleanup(
    cluster: &ManagedCluster,
    artifacts: &ArtifactSet,
    store: &dyn WorkStore,
) -> Result<(), Error> {
    if artifacts.is_empty() {
        if cluster.has_finalizer(CLEANUP_FINALIZER) {
            info!("all artifacts removed, releasing cluster");
            store
                .remove_cluster_finalizer(cluster, CLEANUP_FINALIZER)
                .await?;
        }
        return Ok(());
    }

    let force = force_cleanup(cluster);

    for work in &artifacts.others {
        delete_artifact(work, force, store).await?;
    }

    if force {
        info!(
            local = cluster.is_local(),
            offline = cluster.is_offline(),
            "force-deleting klusterlet artifacts"
        );
        for work in artifacts.agent.iter().chain(artifacts.crds.iter()) {
            delete_artifact(work, true, store).await?;
        }
        return Ok(());
    }

    if let Some(agent) = &artifacts.agent {
        match agent.applied() {
            ConditionStatus::True => delete_artifact(agent, false, store).await?,
            status => {
                // No timeout: the pass is redelivered when the agent work
                // reports Applied
                info!(
                    work = %agent.name_any(),
                    applied = %status,
                    "agent artifact not confirmed applied, deferring deletion"
                );
            }
        }
    }

    match (&artifacts.agent, &artifacts.crds) {
        (None, Some(crds)) => delete_artifact(crds, false, store).await?,
        (Some(_), Some(crds)) => {
            debug!(
                work = %crds.name_any(),
                "waiting for agent artifact removal before deleting CRDs"
            );
        }
        _ => {}
    }

    Ok(())
}

/// Delete one artifact, stripping its finalizers first when forced
async fn delete_artifact(
    work: &ManifestWork,
    force: bool,
    store: &dyn WorkStore,
) -> Result<(), Error> {
    let name = work.name_any();
    let namespace = work.namespace().unwrap_or_default();

    if force && !work.finalizers().is_empty() {
        debug!(work = %name, finalizers = ?work.finalizers(), "clearing work finalizers");
        store.clear_work_finalizers(work).await?;
    }

    if work.is_deleting() {
        debug!(work = %name, "delete already issued");
        return Ok(());
    }

    info!(work = %name, "deleting artifact");
    store.delete_work(&namespace, &name).await
}
