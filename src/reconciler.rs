use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    ClusterConfig, ConfigType, Result,
    artifact::{self, Removal, Synced},
    finalizers::{self, ALL_TOKEN},
    namespaces,
    store::{ArtifactStore, EventSink, Severity, SourceStore},
};

/// Default delay before a failed reconciliation is retried.
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(60);

/// Writes performed by one successful reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub pruned: Vec<String>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.pruned.is_empty()
    }

    fn note(&self) -> String {
        format!(
            "created in {:?}, updated in {:?}, pruned from {:?}",
            self.created, self.updated, self.pruned
        )
    }
}

/// Drives a ClusterConfig towards its spec. Holds no state between calls besides its
/// collaborators, so one instance serves every key.
pub struct Reconciler<S, E> {
    store: S,
    events: E,
    requeue_after: Duration,
}

impl<S, E> Reconciler<S, E>
where
    S: SourceStore + ArtifactStore<ConfigMap> + ArtifactStore<Secret>,
    E: EventSink,
{
    pub fn new(store: S, events: E, requeue_after: Duration) -> Self {
        Self {
            store,
            events,
            requeue_after,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn requeue_after(&self) -> Duration {
        self.requeue_after
    }

    /// Runs one reconciliation for the ClusterConfig `namespace/name`. The object is
    /// always read fresh from the store.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, name: &str, namespace: &str) -> Result<Action> {
        let source = match self.store.get_source(name, namespace).await {
            Ok(source) => source,
            Err(e) if e.is_not_found() => {
                debug!("ClusterConfig is gone, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        let outcome = if source.is_deleting() {
            self.cleanup(source.clone()).await.map(|()| None)
        } else {
            self.apply(source.clone()).await.map(Some)
        };

        match outcome {
            Ok(Some(report)) => {
                if !report.is_empty() {
                    self.events
                        .publish(&source, Severity::Normal, "Synced", report.note())
                        .await;
                }
                info!("Successful reconcile");
                Ok(Action::await_change())
            }
            Ok(None) => {
                info!("Cleaned up ClusterConfig");
                Ok(Action::await_change())
            }
            Err(e) => {
                self.events
                    .publish(&source, Severity::Warning, "ReconcileFailed", e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Requeue decision after a failed reconciliation.
    pub fn error_policy(&self, source: &ClusterConfig, error: &crate::Error) -> Action {
        error!(
            cluster_config = %source.name_any(),
            namespace = ?source.namespace(),
            %error,
            "Reconciliation failed"
        );
        Action::requeue(self.requeue_after)
    }

    async fn apply(&self, mut source: ClusterConfig) -> Result<Report> {
        let target = namespaces::resolve(&source.spec.namespace_list, &self.store).await?;
        let last_synced = source.processed_namespaces().to_vec();
        let mut report = Report::default();

        info!(
            namespaces = ?target.namespaces,
            added = ?namespaces::additions(&target.namespaces, &last_synced),
            "Resolved target namespaces"
        );

        if !last_synced.is_empty() {
            let mut pruned_all = true;
            for namespace in namespaces::prune(&target.namespaces, &last_synced) {
                let removal = self.delete_artifact(&source, &namespace).await?;
                finalizers::remove(&self.store, &mut source, &namespace).await?;

                match removal {
                    Removal::Deleted => report.pruned.push(namespace),
                    Removal::NotOwned => {}
                    Removal::AlreadyAbsent => {
                        info!(namespace, "Stale namespace already clean, stopping prune");
                        pruned_all = false;
                        break;
                    }
                }
            }

            // A namespace literally named `all` shares its token with the sentinel
            let all_is_namespace = target.namespaces.iter().any(|n| n == ALL_TOKEN);
            if !target.all && pruned_all && !all_is_namespace {
                finalizers::remove(&self.store, &mut source, ALL_TOKEN).await?;
            }

            self.persist_status(&mut source, &target.namespaces).await?;
        }

        for token in finalizers::missing(&source, &finalizers::tokens(&target)) {
            finalizers::add(&self.store, &mut source, &token).await?;
        }

        for namespace in &target.namespaces {
            match self.sync_artifact(&source, namespace).await? {
                Synced::Created => report.created.push(namespace.clone()),
                Synced::Updated => report.updated.push(namespace.clone()),
                Synced::Unchanged => {}
            }
        }

        if target.all {
            // The `all` token guards every namespace from here on
            for token in finalizers::held_namespace_tokens(&source) {
                finalizers::remove(&self.store, &mut source, &token).await?;
            }
        }

        self.persist_status(&mut source, &target.namespaces).await?;

        Ok(report)
    }

    async fn cleanup(&self, mut source: ClusterConfig) -> Result<()> {
        let target = namespaces::resolve(&source.spec.namespace_list, &self.store).await?;

        if target.all {
            self.sweep(&mut source, &target.namespaces).await?;
            return Ok(());
        }

        let mut pending = target.namespaces.clone();
        for token in finalizers::held_namespace_tokens(&source) {
            if !pending.contains(&token) {
                pending.push(token);
            }
        }

        for namespace in pending {
            self.delete_artifact(&source, &namespace).await?;
            finalizers::remove(&self.store, &mut source, &namespace).await?;
        }

        if finalizers::has(&source, ALL_TOKEN) {
            warn!("ClusterConfig still holds the all token, sweeping every namespace");
            let live = self.store.list_namespaces().await?;
            self.sweep(&mut source, &live).await?;
        }

        Ok(())
    }

    /// Deletes the artifact from each of `live` and releases the `all` token. Namespace
    /// tokens left behind are released as well since nothing can remain under them.
    async fn sweep(&self, source: &mut ClusterConfig, live: &[String]) -> Result<()> {
        for namespace in live {
            self.delete_artifact(source, namespace).await?;
        }

        finalizers::remove(&self.store, source, ALL_TOKEN).await?;
        for token in finalizers::held_namespace_tokens(source) {
            finalizers::remove(&self.store, source, &token).await?;
        }
        Ok(())
    }

    async fn sync_artifact(&self, source: &ClusterConfig, namespace: &str) -> Result<Synced> {
        match source.spec.config_type {
            ConfigType::ConfigMaps => {
                artifact::synchronize::<ConfigMap, S>(&self.store, source, namespace).await
            }
            ConfigType::Secrets => {
                artifact::synchronize::<Secret, S>(&self.store, source, namespace).await
            }
        }
    }

    async fn delete_artifact(&self, source: &ClusterConfig, namespace: &str) -> Result<Removal> {
        match source.spec.config_type {
            ConfigType::ConfigMaps => {
                artifact::delete::<ConfigMap, S>(&self.store, source, namespace).await
            }
            ConfigType::Secrets => {
                artifact::delete::<Secret, S>(&self.store, source, namespace).await
            }
        }
    }

    async fn persist_status(&self, source: &mut ClusterConfig, namespaces: &[String]) -> Result<()> {
        if source.status.is_some() && source.processed_namespaces() == namespaces {
            return Ok(());
        }

        let mut updated = source.clone();
        updated.status = Some(crate::ClusterConfigStatus {
            processed_namespace: namespaces.to_vec(),
        });
        *source = self.store.update_source_status(&updated).await?;
        debug!(?namespaces, "Persisted processed namespaces");
        Ok(())
    }
}
