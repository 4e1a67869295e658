use std::{collections::BTreeMap, fmt::Debug};

use k8s_openapi::{
    ByteString, NamespaceResourceScope,
    api::core::v1::{ConfigMap, Secret},
};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{info, warn};

use crate::{ClusterConfig, Error, Result, store::ArtifactStore};

/// Label holding the name of the ClusterConfig an artifact was generated from.
pub const SOURCE_LABEL: &str = "homerow.ca/cluster-config";
/// Label holding the namespace of the ClusterConfig an artifact was generated from.
pub const SOURCE_NAMESPACE_LABEL: &str = "homerow.ca/cluster-config-namespace";

/// A namespaced object materialised from `spec.data`.
pub trait Artifact:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: &'static str;

    type Payload: PartialEq + Default + Clone + Send + Sync;

    fn convert_payload(source: &ClusterConfig) -> Self::Payload;

    /// Stored payload, with an absent one reading as empty.
    fn payload(&self) -> Self::Payload;

    fn set_payload(&mut self, payload: Self::Payload);

    fn build(metadata: ObjectMeta, payload: Self::Payload, source: &ClusterConfig) -> Self;
}

impl Artifact for ConfigMap {
    const KIND: &'static str = "ConfigMap";

    type Payload = BTreeMap<String, String>;

    fn convert_payload(source: &ClusterConfig) -> Self::Payload {
        source.spec.data.clone()
    }

    fn payload(&self) -> Self::Payload {
        self.data.clone().unwrap_or_default()
    }

    fn set_payload(&mut self, payload: Self::Payload) {
        self.data = Some(payload);
    }

    fn build(metadata: ObjectMeta, payload: Self::Payload, _source: &ClusterConfig) -> Self {
        ConfigMap {
            metadata,
            data: Some(payload),
            ..ConfigMap::default()
        }
    }
}

impl Artifact for Secret {
    const KIND: &'static str = "Secret";

    type Payload = BTreeMap<String, ByteString>;

    fn convert_payload(source: &ClusterConfig) -> Self::Payload {
        source
            .spec
            .data
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
            .collect()
    }

    fn payload(&self) -> Self::Payload {
        self.data.clone().unwrap_or_default()
    }

    fn set_payload(&mut self, payload: Self::Payload) {
        self.data = Some(payload);
    }

    fn build(metadata: ObjectMeta, payload: Self::Payload, source: &ClusterConfig) -> Self {
        Secret {
            metadata,
            data: Some(payload),
            type_: source.spec.type_.clone().filter(|t| !t.is_empty()),
            ..Secret::default()
        }
    }
}

/// Outcome of [`synchronize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synced {
    Created,
    Updated,
    Unchanged,
}

/// Outcome of [`delete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
    /// Left in place because its labels point at another ClusterConfig.
    NotOwned,
}

pub fn source_name(source: &ClusterConfig) -> Result<&str> {
    source
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingMetadata("name"))
}

fn metadata(source: &ClusterConfig, namespace: &str) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(source_name(source)?.to_owned()),
        namespace: Some(namespace.to_owned()),
        labels: Some(BTreeMap::from([
            (SOURCE_LABEL.to_owned(), source.name_any()),
            (
                SOURCE_NAMESPACE_LABEL.to_owned(),
                source.namespace().unwrap_or_default(),
            ),
        ])),
        ..ObjectMeta::default()
    })
}

/// The ClusterConfig named by an artifact's back-reference labels, if any.
pub fn owner_of<A: Resource>(artifact: &A) -> Option<(String, String)> {
    let labels = artifact.meta().labels.as_ref()?;
    let name = labels.get(SOURCE_LABEL)?;
    let namespace = labels.get(SOURCE_NAMESPACE_LABEL).cloned().unwrap_or_default();
    Some((name.clone(), namespace))
}

fn owned_by_other<A: Resource>(artifact: &A, source: &ClusterConfig) -> Option<String> {
    let (name, namespace) = owner_of(artifact)?;
    if name == source.name_any() && namespace == source.namespace().unwrap_or_default() {
        None
    } else {
        Some(format!("{namespace}/{name}"))
    }
}

/// Makes sure the artifact named after `source` in `namespace` carries the source payload.
/// An unlabelled artifact is adopted by stamping the back-reference labels in the same
/// write. Performs at most one write.
pub async fn synchronize<A, S>(store: &S, source: &ClusterConfig, namespace: &str) -> Result<Synced>
where
    A: Artifact,
    S: ArtifactStore<A> + ?Sized,
{
    let name = source_name(source)?;
    let desired = A::convert_payload(source);

    let mut existing = match ArtifactStore::<A>::get(store, name, namespace).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            let artifact = A::build(metadata(source, namespace)?, desired, source);
            ArtifactStore::<A>::create(store, &artifact).await?;
            info!(kind = A::KIND, name, namespace, "Created artifact");
            return Ok(Synced::Created);
        }
        Err(e) => return Err(e),
    };

    if let Some(owner) = owned_by_other(&existing, source) {
        return Err(Error::Foreign {
            kind: A::KIND,
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            owner,
        });
    }

    let adopt = owner_of(&existing).is_none();
    if !adopt && existing.payload() == desired {
        return Ok(Synced::Unchanged);
    }

    if adopt {
        let labels = existing.meta_mut().labels.get_or_insert_with(BTreeMap::new);
        labels.insert(SOURCE_LABEL.to_owned(), source.name_any());
        labels.insert(
            SOURCE_NAMESPACE_LABEL.to_owned(),
            source.namespace().unwrap_or_default(),
        );
    }
    existing.set_payload(desired);
    ArtifactStore::<A>::replace(store, &existing).await?;
    info!(kind = A::KIND, name, namespace, adopted = adopt, "Updated artifact");

    Ok(Synced::Updated)
}

/// Deletes the artifact named after `source` in `namespace`.
pub async fn delete<A, S>(store: &S, source: &ClusterConfig, namespace: &str) -> Result<Removal>
where
    A: Artifact,
    S: ArtifactStore<A> + ?Sized,
{
    let name = source_name(source)?;

    let existing = match ArtifactStore::<A>::get(store, name, namespace).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => return Ok(Removal::AlreadyAbsent),
        Err(e) => return Err(e),
    };

    if let Some(owner) = owned_by_other(&existing, source) {
        warn!(
            kind = A::KIND,
            name,
            namespace,
            owner,
            "Leaving artifact owned by another ClusterConfig"
        );
        return Ok(Removal::NotOwned);
    }

    match ArtifactStore::<A>::delete(store, name, namespace).await {
        Ok(()) => {
            info!(kind = A::KIND, name, namespace, "Deleted artifact");
            Ok(Removal::Deleted)
        }
        Err(e) if e.is_not_found() => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(e),
    }
}
