#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use cluster_config::{
    ClusterConfig, ClusterConfigSpec, ConfigType, Error, Reconciler, Result,
    artifact::Artifact,
    store::{ArtifactStore, EventSink, Severity, SourceStore},
};
use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::Time,
};
use kube::{Resource, ResourceExt, core::ErrorResponse};

pub const NAME: &str = "app-config";
pub const NAMESPACE: &str = "default";

type Key = (String, String);

#[derive(Default)]
pub struct State {
    pub namespaces: Vec<String>,
    pub sources: BTreeMap<Key, ClusterConfig>,
    pub config_maps: BTreeMap<Key, ConfigMap>,
    pub secrets: BTreeMap<Key, Secret>,
    /// Every mutating call, e.g. `create ConfigMap ns1`.
    pub writes: Vec<String>,
    /// Operation that fails with an internal error, in the same format as `writes`.
    pub fail_on: Option<String>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

/// In-memory cluster with resourceVersion checks on source replaces.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

pub fn internal_error(message: &str) -> Error {
    Error::Store(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: message.to_owned(),
        reason: "InternalError".to_owned(),
        code: 500,
    }))
}

fn conflict(name: &str) -> Error {
    Error::Store(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: format!("the object {name} has been modified"),
        reason: "Conflict".to_owned(),
        code: 409,
    }))
}

fn not_found(kind: &'static str, name: &str, namespace: &str) -> Error {
    Error::NotFound {
        kind,
        name: name.to_owned(),
        namespace: namespace.to_owned(),
    }
}

fn key<K: Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl FakeCluster {
    pub fn with_namespaces(namespaces: &[&str]) -> Self {
        let cluster = Self::default();
        cluster.state().namespaces = namespaces.iter().map(|s| s.to_string()).collect();
        cluster
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state().namespaces.push(namespace.to_owned());
    }

    pub fn insert_source(&self, mut source: ClusterConfig) {
        let mut state = self.state();
        source.metadata.resource_version = state.next_version();
        state.sources.insert(key(&source), source);
    }

    pub fn source(&self) -> Option<ClusterConfig> {
        self.state()
            .sources
            .get(&(NAMESPACE.to_owned(), NAME.to_owned()))
            .cloned()
    }

    /// Edits the stored source the way `kubectl edit` would.
    pub fn edit_source(&self, edit: impl FnOnce(&mut ClusterConfig)) {
        let mut state = self.state();
        let version = state.next_version();
        let source = state
            .sources
            .get_mut(&(NAMESPACE.to_owned(), NAME.to_owned()))
            .expect("source exists");
        edit(source);
        source.metadata.resource_version = version;
    }

    pub fn mark_deleting(&self) {
        let now: Time = serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z"))
            .expect("valid timestamp");
        self.edit_source(|s| s.metadata.deletion_timestamp = Some(now));
    }

    pub fn insert_config_map(&self, mut cm: ConfigMap) {
        let mut state = self.state();
        cm.metadata.resource_version = state.next_version();
        state.config_maps.insert(key(&cm), cm);
    }

    pub fn config_map(&self, namespace: &str) -> Option<ConfigMap> {
        self.state()
            .config_maps
            .get(&(namespace.to_owned(), NAME.to_owned()))
            .cloned()
    }

    pub fn secret(&self, namespace: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_owned(), NAME.to_owned()))
            .cloned()
    }

    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn fail_on(&self, op: &str) {
        self.state().fail_on = Some(op.to_owned());
    }

    fn check(state: &State, op: &str) -> Result<()> {
        match &state.fail_on {
            Some(f) if f == op => Err(internal_error(op)),
            _ => Ok(()),
        }
    }
}

/// Picks the map in [`State`] holding a given artifact kind.
pub trait Stored: Artifact {
    fn map(state: &mut State) -> &mut BTreeMap<Key, Self>;
}

impl Stored for ConfigMap {
    fn map(state: &mut State) -> &mut BTreeMap<Key, Self> {
        &mut state.config_maps
    }
}

impl Stored for Secret {
    fn map(state: &mut State) -> &mut BTreeMap<Key, Self> {
        &mut state.secrets
    }
}

#[async_trait]
impl SourceStore for FakeCluster {
    async fn get_source(&self, name: &str, namespace: &str) -> Result<ClusterConfig> {
        let state = self.state();
        Self::check(&state, "get ClusterConfig")?;
        state
            .sources
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| not_found("ClusterConfig", name, namespace))
    }

    async fn update_source(&self, source: &ClusterConfig) -> Result<ClusterConfig> {
        let mut state = self.state();
        Self::check(&state, "update ClusterConfig")?;
        let k = key(source);
        let status = {
            let stored = state
                .sources
                .get(&k)
                .ok_or_else(|| not_found("ClusterConfig", &k.1, &k.0))?;
            if stored.metadata.resource_version != source.metadata.resource_version {
                return Err(conflict(&k.1));
            }
            stored.status.clone()
        };

        let mut updated = source.clone();
        updated.status = status;
        updated.metadata.resource_version = state.next_version();
        state.writes.push("update ClusterConfig".to_owned());

        let finalized = updated.metadata.deletion_timestamp.is_some()
            && updated.finalizers().is_empty();
        if finalized {
            state.sources.remove(&k);
        } else {
            state.sources.insert(k, updated.clone());
        }
        Ok(updated)
    }

    async fn update_source_status(&self, source: &ClusterConfig) -> Result<ClusterConfig> {
        let mut state = self.state();
        Self::check(&state, "status ClusterConfig")?;
        let k = key(source);
        let version = state.next_version();
        let stored = state
            .sources
            .get_mut(&k)
            .ok_or_else(|| not_found("ClusterConfig", &k.1, &k.0))?;
        stored.status = source.status.clone();
        stored.metadata.resource_version = version;
        let updated = stored.clone();
        state.writes.push("status ClusterConfig".to_owned());
        Ok(updated)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let state = self.state();
        Self::check(&state, "list Namespace")?;
        Ok(state.namespaces.clone())
    }
}

#[async_trait]
impl<A: Stored> ArtifactStore<A> for FakeCluster {
    async fn get(&self, name: &str, namespace: &str) -> Result<A> {
        let mut state = self.state();
        Self::check(&state, &format!("get {} {namespace}", A::KIND))?;
        A::map(&mut state)
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| not_found(A::KIND, name, namespace))
    }

    async fn create(&self, artifact: &A) -> Result<A> {
        let mut state = self.state();
        let (namespace, name) = key(artifact);
        Self::check(&state, &format!("create {} {namespace}", A::KIND))?;
        if !state.namespaces.contains(&namespace) {
            return Err(not_found("Namespace", &namespace, ""));
        }

        let mut created = artifact.clone();
        created.meta_mut().resource_version = state.next_version();
        state.writes.push(format!("create {} {namespace}", A::KIND));
        A::map(&mut state).insert((namespace, name), created.clone());
        Ok(created)
    }

    async fn replace(&self, artifact: &A) -> Result<A> {
        let mut state = self.state();
        let (namespace, name) = key(artifact);
        Self::check(&state, &format!("replace {} {namespace}", A::KIND))?;
        let k = (namespace.clone(), name.clone());
        if !A::map(&mut state).contains_key(&k) {
            return Err(not_found(A::KIND, &name, &namespace));
        }

        let mut replaced = artifact.clone();
        replaced.meta_mut().resource_version = state.next_version();
        state.writes.push(format!("replace {} {namespace}", A::KIND));
        A::map(&mut state).insert(k, replaced.clone());
        Ok(replaced)
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        let mut state = self.state();
        Self::check(&state, &format!("delete {} {namespace}", A::KIND))?;
        A::map(&mut state)
            .remove(&(namespace.to_owned(), name.to_owned()))
            .ok_or_else(|| not_found(A::KIND, name, namespace))?;
        state.writes.push(format!("delete {} {namespace}", A::KIND));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordedEvents {
    events: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordedEvents {
    pub fn all(&self) -> Vec<(Severity, String, String)> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(severity, _, _)| *severity == Severity::Warning)
            .map(|(_, reason, _)| reason)
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordedEvents {
    async fn publish(&self, _source: &ClusterConfig, severity: Severity, reason: &str, note: String) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .push((severity, reason.to_owned(), note));
    }
}

pub type TestReconciler = Reconciler<FakeCluster, RecordedEvents>;

pub fn new_source(namespace_list: &str, config_type: ConfigType, data: &[(&str, &str)]) -> ClusterConfig {
    let mut cc = ClusterConfig::new(
        NAME,
        ClusterConfigSpec {
            namespace_list: namespace_list.to_owned(),
            config_type,
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            type_: None,
        },
    );
    cc.metadata.namespace = Some(NAMESPACE.to_owned());
    cc
}

pub fn reconciler(namespaces: &[&str], source: ClusterConfig) -> TestReconciler {
    let cluster = FakeCluster::with_namespaces(namespaces);
    cluster.insert_source(source);
    Reconciler::new(
        cluster,
        RecordedEvents::default(),
        cluster_config::reconciler::DEFAULT_REQUEUE_AFTER,
    )
}

pub fn finalizers(cluster: &FakeCluster) -> Vec<String> {
    cluster
        .source()
        .map(|s| s.finalizers().to_vec())
        .unwrap_or_default()
}

pub fn processed(cluster: &FakeCluster) -> Vec<String> {
    cluster
        .source()
        .map(|s| s.processed_namespaces().to_vec())
        .unwrap_or_default()
}
