//! Agent image resolution

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::ResourceExt;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::ManagedCluster;
use crate::Error;

/// Logical name of the registration agent component
pub const REGISTRATION_COMPONENT: &str = "registration";

/// Logical name of the work agent component
pub const WORK_COMPONENT: &str = "work";

/// Compiled-in registration agent image
pub const DEFAULT_REGISTRATION_IMAGE: &str = "quay.io/open-cluster-management/registration:latest";

/// Compiled-in work agent image
pub const DEFAULT_WORK_IMAGE: &str = "quay.io/open-cluster-management/work:latest";

/// Cluster annotation holding a JSON object of component image overrides
pub const IMAGE_OVERRIDES_ANNOTATION: &str = "open-cluster-management.io/image-overrides";

/// Component name to image reference
pub type ImageOverrides = BTreeMap<String, String>;

/// Errors from image resolution
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    /// The component has no default image
    #[error("unknown image component '{0}'")]
    UnknownComponent(String),
}

/// Maps logical component names to pull references
#[derive(Clone, Debug)]
pub struct ImageResolver {
    defaults: BTreeMap<String, String>,
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageResolver {
    /// Resolver with the compiled-in defaults
    pub fn new() -> Self {
        let defaults = BTreeMap::from([
            (
                REGISTRATION_COMPONENT.to_string(),
                DEFAULT_REGISTRATION_IMAGE.to_string(),
            ),
            (WORK_COMPONENT.to_string(), DEFAULT_WORK_IMAGE.to_string()),
        ]);
        Self { defaults }
    }

    /// Replace the default image of a component
    pub fn with_default(mut self, component: &str, image: impl Into<String>) -> Self {
        self.defaults.insert(component.to_string(), image.into());
        self
    }

    /// Resolve a component, preferring an override over the default
    pub fn resolve(
        &self,
        component: &str,
        overrides: &ImageOverrides,
    ) -> Result<String, ImageError> {
        let default = self
            .defaults
            .get(component)
            .ok_or_else(|| ImageError::UnknownComponent(component.to_string()))?;

        Ok(overrides
            .get(component)
            .filter(|image| !image.is_empty())
            .unwrap_or(default)
            .clone())
    }
}

/// Source of per-cluster image overrides
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryOverrideSource: Send + Sync {
    /// Overrides for the cluster, empty when none are recorded
    async fn overrides(&self, cluster: &ManagedCluster) -> Result<ImageOverrides, Error>;
}

/// Reads overrides from the [`IMAGE_OVERRIDES_ANNOTATION`] annotation
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotationOverrides;

#[async_trait]
impl RegistryOverrideSource for AnnotationOverrides {
    async fn overrides(&self, cluster: &ManagedCluster) -> Result<ImageOverrides, Error> {
        let Some(raw) = cluster.annotations().get(IMAGE_OVERRIDES_ANNOTATION) else {
            return Ok(ImageOverrides::new());
        };

        serde_json::from_str(raw).map_err(|e| {
            Error::validation_for_field(
                cluster.name_any(),
                format!("metadata.annotations[{}]", IMAGE_OVERRIDES_ANNOTATION),
                format!("image overrides must be a JSON object of strings: {}", e),
            )
        })
    }
}
