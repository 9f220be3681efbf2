//! Import package staging and klusterlet artifact application
//!
//! The import package is created once per cluster and regenerated only when
//! its secret is deleted. Once the cluster has joined, the package contents
//! are applied as the `<cluster>-klusterlet-crds` and `<cluster>-klusterlet`
//! works so the hub keeps the agents current.

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::store::WorkStore;
use super::Context;
use crate::artifact::{
    agent_work_name, crds_work_name, import_secret_name, ArtifactRole, ARTIFACT_ROLE_LABEL,
};
use crate::crd::{ManagedCluster, ManifestWork, ManifestWorkSpec, ManifestsTemplate};
use crate::import::{ImportPackage, InstallMode};
use crate::Error;

/// Create the import package secret if the cluster has none
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn ensure_import_package(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    let name = cluster.name_any();
    let secret_name = import_secret_name(&name);

    if ctx.store.get_secret(&name, &secret_name).await?.is_some() {
        debug!(secret = %secret_name, "import package already staged");
        return Ok(());
    }

    let package = ctx.assembler.build_import_package(cluster).await?;
    let mut secret = package.to_secret();
    secret.metadata.owner_references = cluster.controller_owner_ref(&()).map(|r| vec![r]);

    info!(secret = %secret_name, mode = %package.install_mode, "staging import package");
    ctx.store.create_secret(&secret).await
}

/// Apply the CRD and agent works from the staged import package
///
/// Does nothing until the cluster has joined, for non-Default install modes,
/// and while no import package is staged.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn apply_artifacts(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    if cluster.is_deleting() {
        return Ok(());
    }
    if !cluster.is_joined() {
        debug!("cluster has not joined, skipping artifact application");
        return Ok(());
    }

    let mode = InstallMode::for_cluster(cluster)?;
    if mode != InstallMode::Default {
        debug!(%mode, "agents are not managed through works in this mode");
        return Ok(());
    }

    let name = cluster.name_any();
    let Some(secret) = ctx
        .store
        .get_secret(&name, &import_secret_name(&name))
        .await?
    else {
        debug!("no import package staged yet");
        return Ok(());
    };
    let package = ImportPackage::from_secret(&secret)?;

    let desired = [
        artifact_work(
            cluster,
            &crds_work_name(&name),
            ArtifactRole::Crds,
            &package.crds_yaml,
        )?,
        artifact_work(
            cluster,
            &agent_work_name(&name),
            ArtifactRole::Agent,
            &package.import_yaml,
        )?,
    ];

    let existing = ctx.store.list_works(&name).await?;
    for work in desired {
        let current = existing.iter().find(|w| w.name_any() == work.name_any());
        apply_work(work, current, ctx.store.as_ref()).await?;
    }

    Ok(())
}

/// Split a multi-document YAML blob into raw manifests
pub fn parse_manifests(yaml: &str) -> Result<Vec<serde_json::Value>, Error> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_json::Value::deserialize(document)
            .map_err(|e| Error::serialization_for_kind("ManifestWork", e.to_string()))?;
        if !value.is_null() {
            manifests.push(value);
        }
    }
    Ok(manifests)
}

fn artifact_work(
    cluster: &ManagedCluster,
    work_name: &str,
    role: ArtifactRole,
    yaml: &str,
) -> Result<ManifestWork, Error> {
    let manifests = parse_manifests(yaml)?;
    let mut work = ManifestWork::new(
        work_name,
        ManifestWorkSpec {
            workload: ManifestsTemplate { manifests },
        },
    );
    work.metadata.namespace = Some(cluster.name_any());
    work.metadata.labels = Some(BTreeMap::from([(
        ARTIFACT_ROLE_LABEL.to_string(),
        role.label_value().to_string(),
    )]));
    work.metadata.owner_references = cluster.controller_owner_ref(&()).map(|r| vec![r]);
    Ok(work)
}

fn role_label_matches(current: &ManifestWork, desired: &ManifestWork) -> bool {
    current.labels().get(ARTIFACT_ROLE_LABEL) == desired.labels().get(ARTIFACT_ROLE_LABEL)
}

async fn apply_work(
    desired: ManifestWork,
    current: Option<&ManifestWork>,
    store: &dyn WorkStore,
) -> Result<(), Error> {
    let name = desired.name_any();

    let Some(current) = current else {
        info!(work = %name, "creating artifact");
        return store.create_work(&desired).await;
    };

    if current.is_deleting() {
        debug!(work = %name, "artifact is being deleted, not updating");
        return Ok(());
    }

    if current.spec == desired.spec && role_label_matches(current, &desired) {
        debug!(work = %name, "artifact up to date");
        return Ok(());
    }

    // Keep everything the API server or other writers put on the work and
    // only replace what this controller owns
    let mut updated = current.clone();
    updated.spec = desired.spec;
    updated
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.metadata.labels.unwrap_or_default());
    if updated.metadata.owner_references.is_none() {
        updated.metadata.owner_references = desired.metadata.owner_references;
    }

    info!(work = %name, "updating artifact");
    store.replace_work(&updated).await
}
