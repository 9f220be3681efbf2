//! Error types for the import controller
//!
//! Errors carry the cluster or object they concern so that a failed
//! reconciliation can be traced back from the logs alone. The variants map
//! onto three handling categories:
//!
//! - transient storage failures (`Kube`, `Conflict`): the whole pass is
//!   redelivered
//! - missing inputs (`MissingInput`, `Serialization`): the pass aborts and is
//!   retried once the input shows up
//! - contract violations (`Template`, `Validation`): not retried until the
//!   object or the shipped template set changes

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for import controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Optimistic concurrency conflict on a single-object write
    #[error("conflict writing {kind} {name}: object changed since it was read")]
    Conflict {
        /// Resource kind (ManagedCluster, ManifestWork, Secret)
        kind: String,
        /// Object name
        name: String,
    },

    /// A required input (credential field, image component) is absent
    #[error("missing input for {cluster}: {message}")]
    MissingInput {
        /// Cluster the input was required for
        cluster: String,
        /// What is missing
        message: String,
    },

    /// Invalid user-supplied configuration on a cluster
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "metadata.annotations[...]")
        field: Option<String>,
    },

    /// A shipped manifest template failed to compile or render
    #[error("template error in {template}: {message}")]
    Template {
        /// Template name
        template: String,
        /// Renderer message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a conflict error for a kind and object name
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a missing input error with cluster context
    pub fn missing_input(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MissingInput {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a template error for a named template
    pub fn template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Whether redelivering the reconciliation can fix this error
    ///
    /// Template errors mean the packaged template set is broken and
    /// validation errors need a user edit; both wait for a change instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Template { .. } | Self::Validation { .. })
    }

    /// Whether this is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }
}
