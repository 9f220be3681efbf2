//! Storage collaborator for clusters, works, and import secrets
//!
//! The reconciler never touches a kube `Client` directly; everything goes
//! through [`WorkStore`] so the state machine can be driven by an in-memory
//! store in tests. Writes are single-object and carry the resourceVersion
//! of the snapshot they were computed from, so a concurrent change surfaces
//! as [`Error::Conflict`] instead of a lost update.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ManagedCluster, ManifestWork};
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting the storage operations the controller performs
///
/// This trait allows driving the reconciler against an in-memory store or
/// mocks in tests while using the real API server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Get a ManagedCluster by name, `None` if it does not exist
    async fn get_cluster(&self, name: &str) -> Result<Option<ManagedCluster>, Error>;

    /// List every ManifestWork in a cluster namespace
    async fn list_works(&self, namespace: &str) -> Result<Vec<ManifestWork>, Error>;

    /// Create a ManifestWork
    async fn create_work(&self, work: &ManifestWork) -> Result<(), Error>;

    /// Replace a ManifestWork, guarded by its resourceVersion
    async fn replace_work(&self, work: &ManifestWork) -> Result<(), Error>;

    /// Delete a ManifestWork; deleting a missing work succeeds
    async fn delete_work(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Drop every finalizer from a ManifestWork
    async fn clear_work_finalizers(&self, work: &ManifestWork) -> Result<(), Error>;

    /// Add a finalizer to a ManagedCluster
    async fn add_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a ManagedCluster
    async fn remove_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Get a Secret by namespace and name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;
}

/// Map a write failure, turning HTTP 409 into a conflict
fn write_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind, name),
        e => e.into(),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Real storage implementation backed by the Kubernetes API
pub struct KubeWorkStore {
    client: Client,
}

impl KubeWorkStore {
    /// Create a new KubeWorkStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn works(&self, namespace: &str) -> Api<ManifestWork> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_cluster_finalizers(
        &self,
        cluster: &ManagedCluster,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let name = cluster.name_any();
        let api: Api<ManagedCluster> = Api::all(self.client.clone());

        // resourceVersion in a merge patch makes the API server reject the
        // write if the cluster changed after our read
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cluster.resource_version(),
            }
        });

        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| write_error(e, "ManagedCluster", &name))?;
        Ok(())
    }
}

#[async_trait]
impl WorkStore for KubeWorkStore {
    async fn get_cluster(&self, name: &str) -> Result<Option<ManagedCluster>, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_works(&self, namespace: &str) -> Result<Vec<ManifestWork>, Error> {
        let list = self.works(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_work(&self, work: &ManifestWork) -> Result<(), Error> {
        let name = work.name_any();
        let namespace = work.namespace().unwrap_or_default();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.works(&namespace)
            .create(&params, work)
            .await
            .map_err(|e| write_error(e, "ManifestWork", &name))?;
        Ok(())
    }

    async fn replace_work(&self, work: &ManifestWork) -> Result<(), Error> {
        let name = work.name_any();
        let namespace = work.namespace().unwrap_or_default();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.works(&namespace)
            .replace(&name, &params, work)
            .await
            .map_err(|e| write_error(e, "ManifestWork", &name))?;
        Ok(())
    }

    async fn delete_work(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self.works(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(work = %name, "ManifestWork not found (already deleted)");
                Ok(())
            }
            Err(e) => Err(write_error(e, "ManifestWork", name)),
        }
    }

    async fn clear_work_finalizers(&self, work: &ManifestWork) -> Result<(), Error> {
        let name = work.name_any();
        let namespace = work.namespace().unwrap_or_default();
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": null,
                "resourceVersion": work.resource_version(),
            }
        });

        match self
            .works(&namespace)
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(write_error(e, "ManifestWork", &name)),
        }
    }

    async fn add_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut finalizers = cluster.finalizers().to_vec();

        // Don't add if already present
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        self.patch_cluster_finalizers(cluster, finalizers).await
    }

    async fn remove_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error> {
        let finalizers: Vec<String> = cluster
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();

        self.patch_cluster_finalizers(cluster, finalizers).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let name = secret.name_any();
        let namespace = secret.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, secret)
            .await
            .map_err(|e| write_error(e, "Secret", &name))?;
        Ok(())
    }
}
