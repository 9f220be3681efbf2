//! Bootstrap credential bundle
//!
//! The registration agent starts from a kubeconfig that points at the hub
//! API server and authenticates with a short-lived service account token.
//! The kubeconfig is embedded base64-encoded in the import manifests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Suffix of the secret holding a cluster's bootstrap token: `<cluster>-bootstrap-sa-token`
pub const BOOTSTRAP_TOKEN_SECRET_SUFFIX: &str = "bootstrap-sa-token";

/// Token secret key holding the hub API server URL
pub const TOKEN_SECRET_SERVER_KEY: &str = "server";

/// Token secret key holding the hub CA bundle
pub const TOKEN_SECRET_CA_KEY: &str = "ca.crt";

/// Token secret key holding the bearer token
pub const TOKEN_SECRET_TOKEN_KEY: &str = "token";

/// Cluster entry name in the bootstrap kubeconfig
pub const HUB_CLUSTER_NAME: &str = "hub";

/// Name of the kubeconfig user and context entries
pub const BOOTSTRAP_USER: &str = "bootstrap";

/// Raw inputs for a bootstrap kubeconfig
///
/// Fields are optional because they come from different places (controller
/// flags and a per-cluster secret); [`build_bootstrap_kubeconfig`] rejects a
/// credential with any of them missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapCredential {
    /// Hub API server URL
    pub server: Option<String>,
    /// PEM bundle used to verify the hub API server
    pub certificate_authority_data: Option<Vec<u8>>,
    /// Bearer token for the bootstrap identity
    pub token: Option<String>,
}

/// Errors from building a bootstrap kubeconfig
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A required credential field is absent or empty
    #[error("bootstrap credential is missing {0}")]
    MissingField(&'static str),

    /// The kubeconfig could not be serialized
    #[error("failed to serialize bootstrap kubeconfig: {0}")]
    Serialize(String),
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster<'a>>,
    contexts: Vec<NamedContext>,
    current_context: &'static str,
    users: Vec<NamedUser<'a>>,
}

#[derive(Serialize)]
struct NamedCluster<'a> {
    name: &'static str,
    cluster: ClusterEntry<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedContext {
    name: &'static str,
    context: ContextEntry,
}

#[derive(Serialize)]
struct ContextEntry {
    cluster: &'static str,
    user: &'static str,
}

#[derive(Serialize)]
struct NamedUser<'a> {
    name: &'static str,
    user: UserEntry<'a>,
}

#[derive(Serialize)]
struct UserEntry<'a> {
    token: &'a str,
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, CredentialError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CredentialError::MissingField(field)),
    }
}

/// Render the bootstrap kubeconfig as YAML
pub fn bootstrap_kubeconfig_yaml(
    credential: &BootstrapCredential,
) -> Result<String, CredentialError> {
    let server = required(credential.server.as_deref(), "server")?;
    let token = required(credential.token.as_deref(), "token")?;
    let ca = credential
        .certificate_authority_data
        .as_deref()
        .filter(|ca| !ca.is_empty())
        .ok_or(CredentialError::MissingField("certificate authority data"))?;

    let kubeconfig = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: HUB_CLUSTER_NAME,
            cluster: ClusterEntry {
                server,
                certificate_authority_data: STANDARD.encode(ca),
            },
        }],
        contexts: vec![NamedContext {
            name: BOOTSTRAP_USER,
            context: ContextEntry {
                cluster: HUB_CLUSTER_NAME,
                user: BOOTSTRAP_USER,
            },
        }],
        current_context: BOOTSTRAP_USER,
        users: vec![NamedUser {
            name: BOOTSTRAP_USER,
            user: UserEntry { token },
        }],
    };

    serde_yaml::to_string(&kubeconfig).map_err(|e| CredentialError::Serialize(e.to_string()))
}

/// Build the base64-encoded bootstrap kubeconfig embedded in the manifests
pub fn build_bootstrap_kubeconfig(
    credential: &BootstrapCredential,
) -> Result<String, CredentialError> {
    let yaml = bootstrap_kubeconfig_yaml(credential)?;
    Ok(STANDARD.encode(yaml.as_bytes()))
}

/// Source of the raw bootstrap credential for a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BootstrapCredentialSource: Send + Sync {
    /// Look up the bootstrap credential for the named cluster
    async fn bootstrap_credential(&self, cluster: &str) -> Result<BootstrapCredential, Error>;
}

/// Reads the bootstrap token from `<cluster>-bootstrap-sa-token`
///
/// The hub API server and CA come from controller configuration when set,
/// otherwise from the token secret's `server` and `ca.crt` keys.
pub struct KubeBootstrapSource {
    client: Client,
    hub_api_server: Option<String>,
    hub_ca: Option<Vec<u8>>,
}

impl KubeBootstrapSource {
    /// Create a source reading token secrets through the given client
    pub fn new(
        client: Client,
        hub_api_server: Option<String>,
        hub_ca: Option<Vec<u8>>,
    ) -> Self {
        Self {
            client,
            hub_api_server,
            hub_ca,
        }
    }
}

fn secret_string(data: &BTreeMap<String, k8s_openapi::ByteString>, key: &str) -> Option<String> {
    data.get(key)
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
}

#[async_trait]
impl BootstrapCredentialSource for KubeBootstrapSource {
    async fn bootstrap_credential(&self, cluster: &str) -> Result<BootstrapCredential, Error> {
        let name = format!("{}-{}", cluster, BOOTSTRAP_TOKEN_SECRET_SUFFIX);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), cluster);

        let secret = api.get_opt(&name).await?.ok_or_else(|| {
            Error::missing_input(cluster, format!("bootstrap token secret {} not found", name))
        })?;
        debug!(cluster = %cluster, secret = %name, "read bootstrap token secret");

        Ok(credential_from_token_secret(
            &secret.data.unwrap_or_default(),
            self.hub_api_server.as_deref(),
            self.hub_ca.as_deref(),
        ))
    }
}

/// Merge a token secret's data with the configured hub endpoint
///
/// Configured values take precedence over the secret's.
fn credential_from_token_secret(
    data: &BTreeMap<String, k8s_openapi::ByteString>,
    hub_api_server: Option<&str>,
    hub_ca: Option<&[u8]>,
) -> BootstrapCredential {
    let server = hub_api_server
        .map(str::to_string)
        .or_else(|| secret_string(data, TOKEN_SECRET_SERVER_KEY));
    let certificate_authority_data = hub_ca
        .map(<[u8]>::to_vec)
        .or_else(|| data.get(TOKEN_SECRET_CA_KEY).map(|bytes| bytes.0.clone()));

    BootstrapCredential {
        server,
        certificate_authority_data,
        token: secret_string(data, TOKEN_SECRET_TOKEN_KEY),
    }
}
