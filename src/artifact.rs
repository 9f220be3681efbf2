//! Per-cluster artifact partitioning
//!
//! Every ManifestWork in a cluster's namespace falls into exactly one role.
//! Works created by this controller carry an explicit role label; works
//! without the label are classified by the reserved naming convention.

use kube::ResourceExt;
use tracing::warn;

use crate::crd::ManifestWork;

/// Suffix of the agent artifact name: `<cluster>-klusterlet`
pub const AGENT_WORK_SUFFIX: &str = "klusterlet";

/// Suffix of the CRD artifact name: `<cluster>-klusterlet-crds`
pub const CRDS_WORK_SUFFIX: &str = "klusterlet-crds";

/// Suffix of the import package secret name: `<cluster>-import`
pub const IMPORT_SECRET_SUFFIX: &str = "import";

/// Label recording the role an artifact was created with
pub const ARTIFACT_ROLE_LABEL: &str = "import.open-cluster-management.io/artifact-role";

/// Name of the agent artifact for a cluster
pub fn agent_work_name(cluster: &str) -> String {
    format!("{}-{}", cluster, AGENT_WORK_SUFFIX)
}

/// Name of the CRD artifact for a cluster
pub fn crds_work_name(cluster: &str) -> String {
    format!("{}-{}", cluster, CRDS_WORK_SUFFIX)
}

/// Name of the import package secret for a cluster
pub fn import_secret_name(cluster: &str) -> String {
    format!("{}-{}", cluster, IMPORT_SECRET_SUFFIX)
}

/// Role of an artifact in the managed teardown ordering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    /// CustomResourceDefinitions the agent depends on
    Crds,
    /// The agent itself
    Agent,
    /// Anything else found in the cluster namespace
    Other,
}

impl ArtifactRole {
    /// Value stored in [`ARTIFACT_ROLE_LABEL`]
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Crds => "crds",
            Self::Agent => "agent",
            Self::Other => "other",
        }
    }

    fn from_label(value: &str) -> Option<Self> {
        match value {
            "crds" => Some(Self::Crds),
            "agent" => Some(Self::Agent),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Role implied by the reserved naming convention alone
    pub fn from_name(name: &str, cluster: &str) -> Self {
        if name == crds_work_name(cluster) {
            Self::Crds
        } else if name == agent_work_name(cluster) {
            Self::Agent
        } else {
            Self::Other
        }
    }

    /// Classify a work
    ///
    /// A reserved name always decides the role; the label is only consulted
    /// for works outside the naming convention.
    pub fn classify(work: &ManifestWork, cluster: &str) -> Self {
        match Self::from_name(&work.name_any(), cluster) {
            Self::Other => work
                .labels()
                .get(ARTIFACT_ROLE_LABEL)
                .and_then(|v| Self::from_label(v))
                .unwrap_or(Self::Other),
            reserved => reserved,
        }
    }
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label_value())
    }
}

/// The artifacts observed for one cluster, partitioned by role
#[derive(Clone, Debug, Default)]
pub struct ArtifactSet {
    /// The CRD artifact, if present
    pub crds: Option<ManifestWork>,
    /// The agent artifact, if present
    pub agent: Option<ManifestWork>,
    /// Every other work in the namespace
    pub others: Vec<ManifestWork>,
}

impl ArtifactSet {
    /// Partition a namespace listing into roles
    ///
    /// At most one work holds each reserved role. If two works claim the same
    /// role, the one carrying the reserved name keeps it and the other is
    /// treated as Other.
    pub fn partition(cluster: &str, works: Vec<ManifestWork>) -> Self {
        let mut set = Self::default();

        for work in works {
            let role = ArtifactRole::classify(&work, cluster);
            let slot = match role {
                ArtifactRole::Crds => &mut set.crds,
                ArtifactRole::Agent => &mut set.agent,
                ArtifactRole::Other => {
                    set.others.push(work);
                    continue;
                }
            };

            match slot.take() {
                None => *slot = Some(work),
                Some(existing) => {
                    let (keep, demote) =
                        if ArtifactRole::from_name(&work.name_any(), cluster) == role {
                            (work, existing)
                        } else {
                            (existing, work)
                        };
                    warn!(
                        cluster = %cluster,
                        %role,
                        kept = %keep.name_any(),
                        demoted = %demote.name_any(),
                        "multiple works claim the same role"
                    );
                    *slot = Some(keep);
                    set.others.push(demote);
                }
            }
        }

        set
    }

    /// Whether no artifact exists for the cluster
    pub fn is_empty(&self) -> bool {
        self.crds.is_none() && self.agent.is_none() && self.others.is_empty()
    }

    /// Total number of artifacts
    pub fn len(&self) -> usize {
        self.others.len() + usize::from(self.crds.is_some()) + usize::from(self.agent.is_some())
    }

    /// All artifacts: others first, then agent, then CRDs
    pub fn iter(&self) -> impl Iterator<Item = &ManifestWork> {
        self.others
            .iter()
            .chain(self.agent.iter())
            .chain(self.crds.iter())
    }
}
