//! Resource types consumed by the import controller
//!
//! `ManagedCluster` and `ManifestWork` are owned by the cluster-management
//! API; they are declared here so the controller can read and write them
//! with typed clients.

mod managed_cluster;
mod manifest_work;
mod types;

pub use managed_cluster::{
    ManagedCluster, ManagedClusterSpec, ManagedClusterStatus, CONDITION_AVAILABLE,
    CONDITION_JOINED, LOCAL_CLUSTER_LABEL,
};
pub use manifest_work::{
    ManifestWork, ManifestWorkSpec, ManifestWorkStatus, ManifestsTemplate, CONDITION_APPLIED,
};
pub use types::{condition_status, Condition, ConditionStatus};
