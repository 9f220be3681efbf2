//! ManagedCluster controller
//!
//! This module contains the reconciliation logic for managed clusters and
//! their klusterlet artifacts. The controller follows the Kubernetes
//! observe-diff-act pattern; all storage access goes through [`WorkStore`].

mod apply;
mod cluster;
mod lifecycle;
mod store;

#[cfg(test)]
mod testing;

pub use apply::{apply_artifacts, ensure_import_package, parse_manifests};
pub use cluster::{error_policy, reconcile, Context, ContextBuilder};
pub use lifecycle::{force_cleanup, reconcile_cluster, CLEANUP_FINALIZER};
pub use store::{KubeWorkStore, WorkStore};
