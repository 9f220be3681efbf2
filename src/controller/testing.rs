//! In-memory [`WorkStore`] and fixtures for controller tests
//!
//! The store models the storage semantics the reconciler depends on:
//! deleting an object with finalizers only marks it, clearing the last
//! finalizer of a marked object removes it, and writes carrying a stale
//! resourceVersion fail with a conflict.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use super::store::WorkStore;
use crate::artifact::{ArtifactRole, ARTIFACT_ROLE_LABEL};
use crate::crd::{
    Condition, ConditionStatus, ManagedCluster, ManagedClusterSpec, ManagedClusterStatus,
    ManifestWork, ManifestWorkSpec, ManifestWorkStatus, CONDITION_APPLIED, CONDITION_AVAILABLE,
    CONDITION_JOINED, LOCAL_CLUSTER_LABEL,
};
use crate::Error;

/// A write observed by the in-memory store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    CreateWork(String),
    ReplaceWork(String),
    DeleteWork(String),
    ClearWorkFinalizers(String),
    AddClusterFinalizer(String),
    RemoveClusterFinalizer(String),
    CreateSecret(String),
}

#[derive(Default)]
struct State {
    clusters: BTreeMap<String, ManagedCluster>,
    works: BTreeMap<(String, String), ManifestWork>,
    secrets: BTreeMap<(String, String), Secret>,
    mutations: Vec<Mutation>,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Drop a deleting cluster once nothing holds it anymore
    fn purge_cluster(&mut self, name: &str) {
        if let Some(cluster) = self.clusters.get(name) {
            if cluster.is_deleting() && cluster.finalizers().is_empty() {
                self.clusters.remove(name);
            }
        }
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn work_key(work: &ManifestWork) -> (String, String) {
    key(&work.namespace().unwrap_or_default(), &work.name_any())
}

/// Storage fake with optimistic concurrency and finalizer semantics
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(self, mut cluster: ManagedCluster) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            cluster.metadata.resource_version = Some(state.bump());
            state.clusters.insert(cluster.name_any(), cluster);
        }
        self
    }

    pub fn with_work(self, mut work: ManifestWork) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            work.metadata.resource_version = Some(state.bump());
            state.works.insert(work_key(&work), work);
        }
        self
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
            state.secrets.insert(k, secret);
        }
        self
    }

    pub fn cluster(&self, name: &str) -> Option<ManagedCluster> {
        self.state.lock().unwrap().clusters.get(name).cloned()
    }

    pub fn work(&self, namespace: &str, name: &str) -> Option<ManifestWork> {
        self.state
            .lock()
            .unwrap()
            .works
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .cloned()
    }

    /// Names of the works currently stored in a namespace, sorted
    pub fn work_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .works
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }

    /// Simulate a collaborator dropping its finalizer from a work
    pub fn release_work(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        let v = state.bump();
        let remove = match state.works.get_mut(&k) {
            Some(work) => {
                work.metadata.finalizers = None;
                work.metadata.resource_version = Some(v);
                work.is_deleting()
            }
            None => false,
        };
        if remove {
            state.works.remove(&k);
        }
    }

    /// Simulate the agent reporting the Applied condition on a work
    pub fn mark_applied(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        let v = state.bump();
        if let Some(work) = state.works.get_mut(&key(namespace, name)) {
            work.status = None;
            *work = applied(work.clone());
            work.metadata.resource_version = Some(v);
        }
    }

    fn check_version(
        current: Option<&String>,
        observed: Option<&String>,
        kind: &str,
        name: &str,
    ) -> Result<(), Error> {
        match observed {
            Some(v) if Some(v) != current => Err(Error::conflict(kind, name)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl WorkStore for InMemoryStore {
    async fn get_cluster(&self, name: &str) -> Result<Option<ManagedCluster>, Error> {
        Ok(self.cluster(name))
    }

    async fn list_works(&self, namespace: &str) -> Result<Vec<ManifestWork>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .works
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, w)| w.clone())
            .collect())
    }

    async fn create_work(&self, work: &ManifestWork) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = work_key(work);
        if state.works.contains_key(&k) {
            return Err(Error::conflict("ManifestWork", &k.1));
        }
        let mut stored = work.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.works.insert(k.clone(), stored);
        state.mutations.push(Mutation::CreateWork(k.1));
        Ok(())
    }

    async fn replace_work(&self, work: &ManifestWork) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = work_key(work);
        let current = state
            .works
            .get(&k)
            .ok_or_else(|| Error::conflict("ManifestWork", &k.1))?;
        Self::check_version(
            current.metadata.resource_version.as_ref(),
            work.metadata.resource_version.as_ref(),
            "ManifestWork",
            &k.1,
        )?;
        let mut stored = work.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.works.insert(k.clone(), stored);
        state.mutations.push(Mutation::ReplaceWork(k.1));
        Ok(())
    }

    async fn delete_work(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        state.mutations.push(Mutation::DeleteWork(name.to_string()));
        let has_finalizers = match state.works.get(&k) {
            Some(work) => !work.finalizers().is_empty(),
            None => return Ok(()),
        };
        if has_finalizers {
            let v = state.bump();
            if let Some(work) = state.works.get_mut(&k) {
                if work.metadata.deletion_timestamp.is_none() {
                    work.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                }
                work.metadata.resource_version = Some(v);
            }
        } else {
            state.works.remove(&k);
        }
        Ok(())
    }

    async fn clear_work_finalizers(&self, work: &ManifestWork) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = work_key(work);
        let Some(current) = state.works.get(&k) else {
            return Ok(());
        };
        Self::check_version(
            current.metadata.resource_version.as_ref(),
            work.metadata.resource_version.as_ref(),
            "ManifestWork",
            &k.1,
        )?;
        let deleting = current.is_deleting();
        state
            .mutations
            .push(Mutation::ClearWorkFinalizers(k.1.clone()));
        if deleting {
            state.works.remove(&k);
        } else {
            let v = state.bump();
            if let Some(stored) = state.works.get_mut(&k) {
                stored.metadata.finalizers = None;
                stored.metadata.resource_version = Some(v);
            }
        }
        Ok(())
    }

    async fn add_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = cluster.name_any();
        let current = state
            .clusters
            .get(&name)
            .ok_or_else(|| Error::conflict("ManagedCluster", &name))?;
        Self::check_version(
            current.metadata.resource_version.as_ref(),
            cluster.metadata.resource_version.as_ref(),
            "ManagedCluster",
            &name,
        )?;
        let v = state.bump();
        if let Some(stored) = state.clusters.get_mut(&name) {
            let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
            stored.metadata.resource_version = Some(v);
        }
        state.mutations.push(Mutation::AddClusterFinalizer(name));
        Ok(())
    }

    async fn remove_cluster_finalizer(
        &self,
        cluster: &ManagedCluster,
        finalizer: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = cluster.name_any();
        let current = state
            .clusters
            .get(&name)
            .ok_or_else(|| Error::conflict("ManagedCluster", &name))?;
        Self::check_version(
            current.metadata.resource_version.as_ref(),
            cluster.metadata.resource_version.as_ref(),
            "ManagedCluster",
            &name,
        )?;
        let v = state.bump();
        if let Some(stored) = state.clusters.get_mut(&name) {
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            stored.metadata.resource_version = Some(v);
        }
        state
            .mutations
            .push(Mutation::RemoveClusterFinalizer(name.clone()));
        state.purge_cluster(&name);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let k = key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        if state.secrets.contains_key(&k) {
            return Err(Error::conflict("Secret", &k.1));
        }
        state.secrets.insert(k.clone(), secret.clone());
        state.mutations.push(Mutation::CreateSecret(k.1));
        Ok(())
    }
}

// ===== Fixtures =====

/// A registered cluster with no labels, finalizers, or conditions
pub fn cluster(name: &str) -> ManagedCluster {
    ManagedCluster::new(
        name,
        ManagedClusterSpec {
            hub_accepts_client: true,
            ..Default::default()
        },
    )
}

pub fn with_finalizer(mut cluster: ManagedCluster, finalizer: &str) -> ManagedCluster {
    cluster
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    cluster
}

pub fn deleting(mut cluster: ManagedCluster) -> ManagedCluster {
    cluster.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    cluster
}

pub fn local(mut cluster: ManagedCluster) -> ManagedCluster {
    cluster
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(LOCAL_CLUSTER_LABEL.to_string(), "true".to_string());
    cluster
}

fn with_cluster_condition(
    mut cluster: ManagedCluster,
    type_: &str,
    status: ConditionStatus,
) -> ManagedCluster {
    cluster
        .status
        .get_or_insert_with(ManagedClusterStatus::default)
        .conditions
        .push(Condition::new(type_, status, "Test", ""));
    cluster
}

pub fn offline(cluster: ManagedCluster) -> ManagedCluster {
    with_cluster_condition(cluster, CONDITION_AVAILABLE, ConditionStatus::False)
}

pub fn joined(cluster: ManagedCluster) -> ManagedCluster {
    with_cluster_condition(cluster, CONDITION_JOINED, ConditionStatus::True)
}

pub fn with_annotation(mut cluster: ManagedCluster, key: &str, value: &str) -> ManagedCluster {
    cluster
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    cluster
}

/// An empty work in the given cluster namespace
pub fn work(namespace: &str, name: &str) -> ManifestWork {
    let mut work = ManifestWork::new(name, ManifestWorkSpec::default());
    work.metadata.namespace = Some(namespace.to_string());
    work
}

pub fn role_labeled(mut work: ManifestWork, role: ArtifactRole) -> ManifestWork {
    work.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(ARTIFACT_ROLE_LABEL.to_string(), role.label_value().to_string());
    work
}

pub fn applied(mut work: ManifestWork) -> ManifestWork {
    work.status
        .get_or_insert_with(ManifestWorkStatus::default)
        .conditions
        .push(Condition::new(
            CONDITION_APPLIED,
            ConditionStatus::True,
            "AppliedManifestComplete",
            "",
        ));
    work
}

pub fn not_applied(mut work: ManifestWork) -> ManifestWork {
    work.status
        .get_or_insert_with(ManifestWorkStatus::default)
        .conditions
        .push(Condition::new(
            CONDITION_APPLIED,
            ConditionStatus::False,
            "AppliedManifestFailed",
            "",
        ));
    work
}

pub fn with_work_finalizer(mut work: ManifestWork, finalizer: &str) -> ManifestWork {
    work.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    work
}
