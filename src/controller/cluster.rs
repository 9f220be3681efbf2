//! ManagedCluster controller entry points
//!
//! [`reconcile`] is what `kube::runtime::Controller` calls for every change
//! to a ManagedCluster, one of its ManifestWorks, or its import secret. It
//! runs the lifecycle pass first and, for clusters that are not being
//! removed, stages the import package and applies the klusterlet works.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::apply::{apply_artifacts, ensure_import_package};
use super::lifecycle::reconcile_cluster;
use super::store::{KubeWorkStore, WorkStore};
use crate::crd::ManagedCluster;
use crate::import::{
    AnnotationOverrides, BootstrapCredentialSource, BundleAssembler, ImageResolver,
    KubeBootstrapSource, RegistryOverrideSource,
};
use crate::Error;

/// Requeue delay after an optimistic concurrency conflict
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay after any other retryable failure
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Controller context containing shared collaborators
///
/// The context is shared across all reconciliation calls. Collaborators are
/// trait objects so tests can substitute in-memory or mock implementations.
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .hub_api_server(Some("https://hub.example.com:6443".into()))
///     .images(config.image_resolver())
///     .build()?;
/// ```
pub struct Context {
    /// Storage for clusters, works, and import secrets
    pub store: Arc<dyn WorkStore>,
    /// Import package assembler
    pub assembler: Arc<BundleAssembler>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators
    pub fn new(store: Arc<dyn WorkStore>, assembler: Arc<BundleAssembler>) -> Self {
        Self { store, assembler }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Every collaborator defaults to its Kubernetes-backed implementation.
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn WorkStore>>,
    credentials: Option<Arc<dyn BootstrapCredentialSource>>,
    overrides: Option<Arc<dyn RegistryOverrideSource>>,
    images: ImageResolver,
    hub_api_server: Option<String>,
    hub_ca: Option<Vec<u8>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
            credentials: None,
            overrides: None,
            images: ImageResolver::new(),
            hub_api_server: None,
            hub_ca: None,
        }
    }

    /// Set the hub API server written into bootstrap kubeconfigs
    pub fn hub_api_server(mut self, server: Option<String>) -> Self {
        self.hub_api_server = server;
        self
    }

    /// Set the hub CA bundle written into bootstrap kubeconfigs
    pub fn hub_ca(mut self, ca: Option<Vec<u8>>) -> Self {
        self.hub_ca = ca;
        self
    }

    /// Set the agent image defaults
    pub fn images(mut self, images: ImageResolver) -> Self {
        self.images = images;
        self
    }

    /// Override the storage collaborator (primarily for testing)
    pub fn store(mut self, store: Arc<dyn WorkStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the bootstrap credential source
    pub fn credential_source(mut self, source: Arc<dyn BootstrapCredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Override the registry override source
    pub fn override_source(mut self, source: Arc<dyn RegistryOverrideSource>) -> Self {
        self.overrides = Some(source);
        self
    }

    /// Build the Context
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if the shipped templates fail to compile.
    pub fn build(self) -> Result<Context, Error> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(KubeWorkStore::new(self.client.clone())));
        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(KubeBootstrapSource::new(
                self.client.clone(),
                self.hub_api_server,
                self.hub_ca,
            ))
        });
        let overrides = self
            .overrides
            .unwrap_or_else(|| Arc::new(AnnotationOverrides));

        let assembler = BundleAssembler::new(credentials, overrides, self.images)?;
        Ok(Context::new(store, Arc::new(assembler)))
    }
}

/// Reconcile a ManagedCluster
///
/// For clusters that are not being deleted, stages the import package and
/// applies the klusterlet works before the lifecycle pass, so works created
/// here are already covered by the finalizer when the call returns. There is
/// no periodic requeue: every relevant object change redelivers the cluster.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    debug!("reconciling cluster");

    if cluster.is_deleting() {
        reconcile_cluster(&name, ctx.store.as_ref()).await?;
        return Ok(Action::await_change());
    }

    // A staging failure must not skip finalizer sync for existing works
    let staged = stage(&cluster, &ctx).await;
    reconcile_cluster(&name, ctx.store.as_ref()).await?;
    staged?;

    Ok(Action::await_change())
}

async fn stage(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    ensure_import_package(cluster, ctx).await?;
    apply_artifacts(cluster, ctx).await
}

/// Decide how to retry a failed reconciliation
///
/// Conflicts are retried almost immediately against a fresh snapshot.
/// Template and validation errors wait for the object to change.
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = cluster.name_any();

    if error.is_conflict() {
        debug!(cluster = %name, %error, "write conflict, retrying");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    if !error.is_retryable() {
        error!(cluster = %name, %error, "reconciliation failed, waiting for a change");
        return Action::await_change();
    }

    warn!(cluster = %name, %error, "reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::lifecycle::CLEANUP_FINALIZER;
    use crate::controller::store::MockWorkStore;
    use crate::controller::testing::*;
    use crate::import::credential::MockBootstrapCredentialSource;
    use crate::import::image::MockRegistryOverrideSource;
    use crate::import::BootstrapCredential;
    use rstest::rstest;

    fn assembler() -> Arc<BundleAssembler> {
        let mut creds = MockBootstrapCredentialSource::new();
        creds.expect_bootstrap_credential().returning(|_| {
            Ok(BootstrapCredential {
                server: Some("https://hub:6443".to_string()),
                certificate_authority_data: Some(b"ca".to_vec()),
                token: Some("tok".to_string()),
            })
        });
        let mut regs = MockRegistryOverrideSource::new();
        regs.expect_overrides().returning(|_| Ok(Default::default()));
        Arc::new(
            BundleAssembler::new(Arc::new(creds), Arc::new(regs), ImageResolver::new()).unwrap(),
        )
    }

    fn context(store: &InMemoryStore) -> Arc<Context> {
        Arc::new(Context::new(Arc::new(store.clone()), assembler()))
    }

    /// Story: a cluster goes from registration to supervised across a few
    /// redeliveries: the package is staged, the works are applied once it
    /// joins, and the finalizer follows the works.
    #[tokio::test]
    async fn story_registration_to_supervision() {
        let store = InMemoryStore::new().with_cluster(joined(cluster("spoke")));
        let ctx = context(&store);

        // First delivery stages the package, applies the works and puts
        // them under supervision
        let c = Arc::new(store.cluster("spoke").unwrap());
        let action = reconcile(c, ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.secret("spoke", "spoke-import").is_some());
        assert_eq!(
            store.work_names("spoke"),
            vec!["spoke-klusterlet", "spoke-klusterlet-crds"]
        );
        assert!(store
            .cluster("spoke")
            .unwrap()
            .has_finalizer(CLEANUP_FINALIZER));

        // The redelivery caused by those writes has nothing left to do
        store.clear_mutations();
        let c = Arc::new(store.cluster("spoke").unwrap());
        reconcile(c, ctx).await.unwrap();
        assert!(store.mutations().is_empty());
    }

    /// Story: a deleting cluster is only torn down, never re-provisioned.
    #[tokio::test]
    async fn story_deleting_cluster_is_not_restaged() {
        let c = deleting(with_finalizer(joined(cluster("spoke")), CLEANUP_FINALIZER));
        let store = InMemoryStore::new()
            .with_cluster(c)
            .with_work(work("spoke", "addon"));
        let ctx = context(&store);

        let c = Arc::new(store.cluster("spoke").unwrap());
        let action = reconcile(c, ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(store.secret("spoke", "spoke-import").is_none());
        assert!(store.work_names("spoke").is_empty());
    }

    /// Story: a joined cluster still holding the finalizer from an earlier
    /// life gets its works back without the finalizer ever dropping.
    #[tokio::test]
    async fn story_finalizer_is_kept_while_works_are_recreated() {
        let c = with_finalizer(joined(cluster("spoke")), CLEANUP_FINALIZER);
        let store = InMemoryStore::new().with_cluster(c);
        let ctx = context(&store);

        let c = Arc::new(store.cluster("spoke").unwrap());
        reconcile(c, ctx).await.unwrap();

        assert_eq!(store.work_names("spoke").len(), 2);
        assert!(store
            .cluster("spoke")
            .unwrap()
            .has_finalizer(CLEANUP_FINALIZER));
        assert!(!store
            .mutations()
            .iter()
            .any(|m| matches!(m, Mutation::RemoveClusterFinalizer(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_error_is_returned() {
        let mut mock = MockWorkStore::new();
        mock.expect_get_cluster()
            .returning(|_| Err(Error::conflict("ManagedCluster", "spoke")));
        let ctx = Arc::new(Context::new(Arc::new(mock), assembler()));
        let c = deleting(with_finalizer(cluster("spoke"), CLEANUP_FINALIZER));

        let err = reconcile(Arc::new(c), ctx).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_staging_error_still_syncs_finalizer() {
        let mut mock = MockWorkStore::new();
        mock.expect_get_secret()
            .returning(|_, _| Err(Error::missing_input("spoke", "hub unreachable")));
        mock.expect_get_cluster()
            .returning(|_| Ok(Some(joined(cluster("spoke")))));
        mock.expect_list_works()
            .returning(|_| Ok(vec![work("spoke", "spoke-klusterlet")]));
        mock.expect_add_cluster_finalizer()
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = Arc::new(Context::new(Arc::new(mock), assembler()));

        let err = reconcile(Arc::new(joined(cluster("spoke"))), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput { .. }));
    }

    #[rstest]
    #[case::conflict(Error::conflict("ManifestWork", "spoke-klusterlet"), Action::requeue(CONFLICT_REQUEUE))]
    #[case::missing_input(Error::missing_input("spoke", "no token"), Action::requeue(ERROR_REQUEUE))]
    #[case::template(Error::template("namespace.yaml", "bad"), Action::await_change())]
    #[case::validation(Error::validation("bad annotation"), Action::await_change())]
    fn test_error_policy(#[case] error: Error, #[case] expected: Action) {
        let store = InMemoryStore::new();
        let action = error_policy(Arc::new(cluster("spoke")), &error, context(&store));
        assert_eq!(action, expected);
    }
}
