//! Boundary to the cluster: typed get/create/update/delete for the source object and
//! its artifacts, plus the event sink. The reconciler only talks to these traits.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use tracing::warn;

use crate::{ClusterConfig, Error, Result, artifact::Artifact};

const SOURCE_KIND: &str = "ClusterConfig";

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(&self, name: &str, namespace: &str) -> Result<ClusterConfig>;

    /// Replaces the whole object. Fails with a conflict if `source` was read at an older
    /// `resourceVersion` than the one stored.
    async fn update_source(&self, source: &ClusterConfig) -> Result<ClusterConfig>;

    async fn update_source_status(&self, source: &ClusterConfig) -> Result<ClusterConfig>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ArtifactStore<A: Artifact>: Send + Sync {
    async fn get(&self, name: &str, namespace: &str) -> Result<A>;
    async fn create(&self, artifact: &A) -> Result<A>;
    async fn replace(&self, artifact: &A) -> Result<A>;
    async fn delete(&self, name: &str, namespace: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Sink for user visible events attached to the source object.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, source: &ClusterConfig, severity: Severity, reason: &str, note: String);
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn sources(&self, namespace: &str) -> Api<ClusterConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn name_and_namespace<K: Resource>(obj: &K) -> Result<(String, String)> {
    let name = obj.meta().name.clone().ok_or(Error::MissingMetadata("name"))?;
    let namespace = obj
        .meta()
        .namespace
        .clone()
        .ok_or(Error::MissingMetadata("namespace"))?;
    Ok((name, namespace))
}

#[async_trait]
impl SourceStore for KubeStore {
    async fn get_source(&self, name: &str, namespace: &str) -> Result<ClusterConfig> {
        self.sources(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, SOURCE_KIND, name, namespace))
    }

    async fn update_source(&self, source: &ClusterConfig) -> Result<ClusterConfig> {
        let (name, namespace) = name_and_namespace(source)?;
        self.sources(&namespace)
            .replace(&name, &PostParams::default(), source)
            .await
            .map_err(|e| Error::from_kube(e, SOURCE_KIND, &name, &namespace))
    }

    async fn update_source_status(&self, source: &ClusterConfig) -> Result<ClusterConfig> {
        let (name, namespace) = name_and_namespace(source)?;
        let patch = serde_json::json!({ "status": serde_json::to_value(&source.status)? });
        self.sources(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, SOURCE_KIND, &name, &namespace))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(Error::Store)?;

        Ok(namespaces.items.iter().map(|n| n.name_any()).collect())
    }
}

#[async_trait]
impl<A: Artifact> ArtifactStore<A> for KubeStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<A> {
        Api::<A>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, A::KIND, name, namespace))
    }

    async fn create(&self, artifact: &A) -> Result<A> {
        let (name, namespace) = name_and_namespace(artifact)?;
        Api::<A>::namespaced(self.client.clone(), &namespace)
            .create(&PostParams::default(), artifact)
            .await
            .map_err(|e| Error::from_kube(e, A::KIND, &name, &namespace))
    }

    async fn replace(&self, artifact: &A) -> Result<A> {
        let (name, namespace) = name_and_namespace(artifact)?;
        Api::<A>::namespaced(self.client.clone(), &namespace)
            .replace(&name, &PostParams::default(), artifact)
            .await
            .map_err(|e| Error::from_kube(e, A::KIND, &name, &namespace))
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        Api::<A>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, A::KIND, name, namespace))
    }
}

/// Publishes Kubernetes events through the `events.k8s.io` API.
pub struct KubeEvents {
    recorder: Recorder,
}

impl KubeEvents {
    pub fn new(client: Client, reporter: impl Into<String>) -> Self {
        let reporter = Reporter {
            controller: reporter.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEvents {
    async fn publish(&self, source: &ClusterConfig, severity: Severity, reason: &str, note: String) {
        let event = Event {
            type_: match severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: reason.to_owned(),
            note: Some(note),
            action: "Reconcile".to_owned(),
            secondary: None,
        };

        // Best effort
        if let Err(e) = self.recorder.publish(&event, &source.object_ref(&())).await {
            warn!(
                cluster_config = %source.name_any(),
                error = %e,
                "Unable to publish event"
            );
        }
    }
}
