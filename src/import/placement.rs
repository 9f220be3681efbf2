//! Agent placement hints read from cluster annotations

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use kube::ResourceExt;
use serde::de::DeserializeOwned;

use crate::crd::ManagedCluster;
use crate::Error;

/// Annotation holding a JSON object used as the agents' node selector
pub const NODE_SELECTOR_ANNOTATION: &str = "open-cluster-management/nodeSelector";

/// Annotation holding a JSON array of tolerations for the agents
pub const TOLERATIONS_ANNOTATION: &str = "open-cluster-management/tolerations";

/// Where the agent deployments may be scheduled
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Placement {
    /// Node selector for the agent pods
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations for the agent pods
    pub tolerations: Vec<Toleration>,
}

impl Placement {
    /// Read placement hints from the cluster's annotations
    ///
    /// Absent annotations mean no constraint; malformed ones are rejected.
    pub fn for_cluster(cluster: &ManagedCluster) -> Result<Self, Error> {
        let node_selector: BTreeMap<String, String> =
            parse_annotation(cluster, NODE_SELECTOR_ANNOTATION)?.unwrap_or_default();

        if let Some(key) = node_selector.keys().find(|k| k.trim().is_empty()) {
            return Err(Error::validation_for_field(
                cluster.name_any(),
                format!("metadata.annotations[{}]", NODE_SELECTOR_ANNOTATION),
                format!("invalid node selector key {:?}", key),
            ));
        }

        Ok(Self {
            node_selector,
            tolerations: parse_annotation(cluster, TOLERATIONS_ANNOTATION)?.unwrap_or_default(),
        })
    }
}

fn parse_annotation<T: DeserializeOwned>(
    cluster: &ManagedCluster,
    annotation: &str,
) -> Result<Option<T>, Error> {
    let Some(raw) = cluster.annotations().get(annotation) else {
        return Ok(None);
    };

    serde_json::from_str(raw).map(Some).map_err(|e| {
        Error::validation_for_field(
            cluster.name_any(),
            format!("metadata.annotations[{}]", annotation),
            format!("malformed JSON: {}", e),
        )
    })
}
