use std::collections::BTreeMap;

use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::namespaces;

/// Which kind of object gets replicated into every target namespace.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    ConfigMaps,
    Secrets,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "homerow.ca",
    version = "v1alpha1",
    kind = "ClusterConfig",
    namespaced,
    status = "ClusterConfigStatus",
    shortname = "cc",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.configType"}"#,
    printcolumn = r#"{"name":"Namespaces","type":"string","jsonPath":".spec.namespaceList"}"#
)]
pub struct ClusterConfigSpec {
    /// Comma separated namespace names, or `all` for every namespace in the cluster.
    #[serde(default)]
    pub namespace_list: String,
    pub config_type: ConfigType,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Secret type hint, only used when `configType` is `secrets`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigStatus {
    /// Namespaces holding an artifact as of the last successful reconciliation.
    #[serde(default)]
    pub processed_namespace: Vec<String>,
}

impl ClusterConfig {
    pub fn processed_namespaces(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.processed_namespace.as_slice())
            .unwrap_or_default()
    }

    pub fn targets_all(&self) -> bool {
        namespaces::is_all(&namespaces::parse(&self.spec.namespace_list))
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
