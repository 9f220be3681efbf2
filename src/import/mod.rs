//! Import package assembly
//!
//! A cluster joins the hub by applying its import package: the klusterlet
//! CRDs plus the install manifests for the registration and work agents,
//! with a bootstrap kubeconfig embedded. The package is persisted as the
//! `<cluster>-import` secret in the cluster namespace, where the artifact
//! application path and external tooling pick it up.
//!
//! # Assembly
//!
//! [`BundleAssembler::build_import_package`] gathers its inputs from
//! collaborators ([`BootstrapCredentialSource`], [`RegistryOverrideSource`])
//! and cluster annotations, builds one [`KlusterletConfig`], and renders the
//! fixed template sets against it.

pub mod credential;
pub mod image;
mod placement;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::artifact::import_secret_name;
use crate::crd::ManagedCluster;
use crate::template::{KlusterletConfig, TemplateEngine, TemplateSet};
use crate::Error;

pub use credential::{
    build_bootstrap_kubeconfig, BootstrapCredential, BootstrapCredentialSource, CredentialError,
    KubeBootstrapSource,
};
pub use image::{
    AnnotationOverrides, ImageError, ImageOverrides, ImageResolver, RegistryOverrideSource,
    DEFAULT_REGISTRATION_IMAGE, DEFAULT_WORK_IMAGE, IMAGE_OVERRIDES_ANNOTATION,
    REGISTRATION_COMPONENT, WORK_COMPONENT,
};
pub use placement::{Placement, NODE_SELECTOR_ANNOTATION, TOLERATIONS_ANNOTATION};

/// Label marking a secret as an import package
pub const IMPORT_SECRET_LABEL: &str = "cluster.open-cluster-management.io/import-secret";

/// Cluster annotation selecting the install mode, also recorded on the package
pub const DEPLOY_MODE_ANNOTATION: &str = "import.open-cluster-management.io/klusterlet-deploy-mode";

/// Secret key holding the rendered CRD manifests
pub const CRDS_YAML_KEY: &str = "crds.yaml";

/// Secret key holding the rendered install manifests
pub const IMPORT_YAML_KEY: &str = "import.yaml";

/// Agent namespace in the Default install mode
pub const DEFAULT_AGENT_NAMESPACE: &str = "open-cluster-management-agent";

/// How the klusterlet is deployed relative to the managed cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstallMode {
    /// Agents run on the managed cluster
    #[default]
    Default,
    /// Agents run outside the managed cluster
    Detached,
    /// Agents are hosted on a separate hosting cluster
    Hosted,
}

impl InstallMode {
    /// Annotation value for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Detached => "Detached",
            Self::Hosted => "Hosted",
        }
    }

    /// Install mode requested by the cluster's annotation
    pub fn for_cluster(cluster: &ManagedCluster) -> Result<Self, Error> {
        match cluster.annotations().get(DEPLOY_MODE_ANNOTATION) {
            None => Ok(Self::Default),
            Some(raw) => raw.parse::<InstallMode>().map_err(|_| {
                Error::validation_for_field(
                    cluster.name_any(),
                    format!("metadata.annotations[{}]", DEPLOY_MODE_ANNOTATION),
                    format!(
                        "unknown install mode '{}', expected Default, Detached or Hosted",
                        raw
                    ),
                )
            }),
        }
    }

    /// Namespace the agents are installed into
    pub fn agent_namespace(&self, cluster: &str) -> String {
        match self {
            Self::Default => DEFAULT_AGENT_NAMESPACE.to_string(),
            Self::Detached | Self::Hosted => format!("klusterlet-{}", cluster),
        }
    }
}

impl FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Default" => Ok(Self::Default),
            "Detached" => Ok(Self::Detached),
            "Hosted" => Ok(Self::Hosted),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered import package for one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportPackage {
    /// Cluster the package was built for
    pub cluster: String,
    /// Install mode the manifests were rendered for
    pub install_mode: InstallMode,
    /// Multi-document CRD manifests
    pub crds_yaml: String,
    /// Multi-document install manifests, bootstrap kubeconfig embedded
    pub import_yaml: String,
}

impl ImportPackage {
    /// Name of the persisted package
    pub fn name(&self) -> String {
        import_secret_name(&self.cluster)
    }

    /// The secret the package is persisted as
    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name()),
                namespace: Some(self.cluster.clone()),
                labels: Some(BTreeMap::from([(
                    IMPORT_SECRET_LABEL.to_string(),
                    "true".to_string(),
                )])),
                annotations: Some(BTreeMap::from([(
                    DEPLOY_MODE_ANNOTATION.to_string(),
                    self.install_mode.to_string(),
                )])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([
                (
                    CRDS_YAML_KEY.to_string(),
                    ByteString(self.crds_yaml.as_bytes().to_vec()),
                ),
                (
                    IMPORT_YAML_KEY.to_string(),
                    ByteString(self.import_yaml.as_bytes().to_vec()),
                ),
            ])),
            ..Default::default()
        }
    }

    /// Read a package back from its secret
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        let cluster = secret.namespace().unwrap_or_default();
        let install_mode = match secret.annotations().get(DEPLOY_MODE_ANNOTATION) {
            None => InstallMode::Default,
            Some(raw) => raw.parse::<InstallMode>().map_err(|raw| {
                Error::serialization_for_kind(
                    "Secret",
                    format!("import secret has unknown install mode '{}'", raw),
                )
            })?,
        };

        let data = secret.data.as_ref();
        let read = |key: &str| -> Result<String, Error> {
            let bytes = data.and_then(|d| d.get(key)).ok_or_else(|| {
                Error::missing_input(&cluster, format!("import secret has no {} key", key))
            })?;
            String::from_utf8(bytes.0.clone()).map_err(|e| {
                Error::serialization_for_kind("Secret", format!("{} is not UTF-8: {}", key, e))
            })
        };

        let crds_yaml = read(CRDS_YAML_KEY)?;
        let import_yaml = read(IMPORT_YAML_KEY)?;

        Ok(Self {
            cluster,
            install_mode,
            crds_yaml,
            import_yaml,
        })
    }
}

/// Builds import packages from the shipped templates
pub struct BundleAssembler {
    credentials: Arc<dyn BootstrapCredentialSource>,
    overrides: Arc<dyn RegistryOverrideSource>,
    images: ImageResolver,
    templates: TemplateEngine,
}

impl BundleAssembler {
    /// Create an assembler, compiling the template set
    pub fn new(
        credentials: Arc<dyn BootstrapCredentialSource>,
        overrides: Arc<dyn RegistryOverrideSource>,
        images: ImageResolver,
    ) -> Result<Self, Error> {
        Ok(Self {
            credentials,
            overrides,
            images,
            templates: TemplateEngine::new()?,
        })
    }

    /// Assemble the import package for a cluster
    ///
    /// # Errors
    ///
    /// - [`Error::MissingInput`] when the bootstrap credential is incomplete
    ///   or an image component cannot be resolved
    /// - [`Error::Validation`] when an install mode or placement annotation is
    ///   malformed
    /// - [`Error::Template`] when a shipped template fails to render
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    pub async fn build_import_package(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ImportPackage, Error> {
        let name = cluster.name_any();

        let credential = self.credentials.bootstrap_credential(&name).await?;
        let bootstrap_kubeconfig = build_bootstrap_kubeconfig(&credential).map_err(|e| match e {
            CredentialError::MissingField(_) => Error::missing_input(&name, e.to_string()),
            CredentialError::Serialize(msg) => Error::serialization_for_kind("Kubeconfig", msg),
        })?;

        let overrides = self.overrides.overrides(cluster).await?;
        let resolve = |component: &str| {
            self.images
                .resolve(component, &overrides)
                .map_err(|e| Error::missing_input(&name, e.to_string()))
        };
        let registration_image = resolve(REGISTRATION_COMPONENT)?;
        let work_image = resolve(WORK_COMPONENT)?;

        let install_mode = InstallMode::for_cluster(cluster)?;
        let placement = Placement::for_cluster(cluster)?;

        let config = KlusterletConfig {
            cluster_name: name.clone(),
            agent_namespace: install_mode.agent_namespace(&name),
            install_mode: install_mode.to_string(),
            bootstrap_kubeconfig,
            registration_image,
            work_image,
            node_selector: placement.node_selector,
            tolerations: placement.tolerations,
        };

        let crds_yaml = self.templates.render_set(TemplateSet::Crds, &config)?;
        let import_yaml = self.templates.render_set(TemplateSet::Install, &config)?;

        info!(
            mode = %install_mode,
            namespace = %config.agent_namespace,
            "assembled import package"
        );

        Ok(ImportPackage {
            cluster: name,
            install_mode,
            crds_yaml,
            import_yaml,
        })
    }
}
