//! Values the manifest templates are rendered against

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use serde::Serialize;

/// Per-cluster configuration for rendering the klusterlet manifests
///
/// Every field is referenced by at least one shipped template; rendering
/// uses strict undefined handling, so a renamed field is caught by the
/// template tests rather than producing an empty value.
#[derive(Clone, Debug, Default, Serialize)]
pub struct KlusterletConfig {
    /// Name of the managed cluster
    pub cluster_name: String,
    /// Namespace the agents run in
    pub agent_namespace: String,
    /// Install mode tag (`Default`, `Detached`, `Hosted`)
    pub install_mode: String,
    /// Base64 encoded bootstrap kubeconfig
    pub bootstrap_kubeconfig: String,
    /// Registration agent image reference
    pub registration_image: String,
    /// Work agent image reference
    pub work_image: String,
    /// Node selector applied to the agent deployments
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations applied to the agent deployments
    pub tolerations: Vec<Toleration>,
}
