//! ManifestWork resource
//!
//! A bundle of manifests the remote agent applies on the managed cluster.
//! Works live in the namespace named after their cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{condition_status, Condition, ConditionStatus};

/// Condition type reported once the agent applied the work at least once
pub const CONDITION_APPLIED: &str = "Applied";

/// Specification for a ManifestWork
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    plural = "manifestworks",
    namespaced,
    status = "ManifestWorkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Manifests to apply on the managed cluster
    #[serde(default)]
    pub workload: ManifestsTemplate,
}

/// Ordered list of raw manifests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw Kubernetes objects, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<serde_json::Value>,
}

/// Status for a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkStatus {
    /// Conditions reported by the work agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ManifestWork {
    /// Applied condition; Unknown when the agent never reported it
    pub fn applied(&self) -> ConditionStatus {
        self.status
            .as_ref()
            .and_then(|s| condition_status(&s.conditions, CONDITION_APPLIED))
            .unwrap_or_default()
    }

    /// Whether a delete was already issued for this work
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
