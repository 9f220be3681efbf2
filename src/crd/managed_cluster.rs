//! ManagedCluster resource
//!
//! The hub's record of a registered remote cluster. It is created by the
//! registration flow; this controller only reads it and manages its own
//! finalizer.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{condition_status, Condition, ConditionStatus};

/// Label marking the hub's own cluster (self-managed)
pub const LOCAL_CLUSTER_LABEL: &str = "local-cluster";

/// Condition type set once the registration handshake completes
pub const CONDITION_JOINED: &str = "ManagedClusterJoined";

/// Condition type reflecting heartbeat reachability
pub const CONDITION_AVAILABLE: &str = "ManagedClusterConditionAvailable";

/// Specification for a ManagedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    status = "ManagedClusterStatus",
    printcolumn = r#"{"name":"Accepted","type":"boolean","jsonPath":".spec.hubAcceptsClient"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the cluster's registration
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// Lease duration for the agent heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

/// Status for a ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Conditions reported by the registration agent and the hub
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ManagedCluster {
    /// Whether this is the hub's own cluster
    pub fn is_local(&self) -> bool {
        self.labels()
            .get(LOCAL_CLUSTER_LABEL)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Whether removal of the cluster has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the cluster carries the given finalizer
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    fn condition(&self, type_: &str) -> Option<ConditionStatus> {
        self.status
            .as_ref()
            .and_then(|s| condition_status(&s.conditions, type_))
    }

    /// Whether the registration handshake has completed
    pub fn is_joined(&self) -> bool {
        self.condition(CONDITION_JOINED) == Some(ConditionStatus::True)
    }

    /// Whether the hub has explicitly observed the cluster as unreachable
    ///
    /// An absent or Unknown Available condition does not count as offline.
    pub fn is_offline(&self) -> bool {
        self.condition(CONDITION_AVAILABLE) == Some(ConditionStatus::False)
    }
}
