use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::{
    Api, Client, Resource, ResourceExt,
    config::KubeConfigOptions,
    runtime::{
        Controller,
        controller::Action,
        reflector::{ObjectRef, Store},
        watcher,
    },
};
use tracing::{error, info};

pub mod artifact;
pub mod crds;
pub mod error;
pub mod finalizers;
pub mod namespaces;
pub mod reconciler;
pub mod store;

pub use crds::*;
pub use error::{Error, Result};
pub use reconciler::Reconciler;

use artifact::{SOURCE_LABEL, owner_of};
use store::{KubeEvents, KubeStore};

type Context = Reconciler<KubeStore, KubeEvents>;

/// Runtime knobs for [`run`].
#[derive(Clone, Debug)]
pub struct Settings {
    pub requeue_after: Duration,
    /// Controller name recorded on published events.
    pub reporter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            requeue_after: reconciler::DEFAULT_REQUEUE_AFTER,
            reporter: "cluster-config-controller".to_owned(),
        }
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let options = KubeConfigOptions::default();

    // Load kubeconfig if it's present otherwise fall back to cluster config
    let config = kube::Config::from_kubeconfig(&options)
        .await
        .or_else(|_| kube::Config::incluster())?;
    let client = Client::try_from(config)?;

    let ctx = Arc::new(Reconciler::new(
        KubeStore::new(client.clone()),
        KubeEvents::new(client.clone(), settings.reporter),
        settings.requeue_after,
    ));

    let controller = Controller::new(
        Api::<ClusterConfig>::all(client.clone()),
        watcher::Config::default(),
    );
    let sources = controller.store();
    let managed = watcher::Config::default().labels(SOURCE_LABEL);

    info!("Starting ClusterConfig controller");

    controller
        .watches(
            Api::<ConfigMap>::all(client.clone()),
            managed.clone(),
            source_of::<ConfigMap>,
        )
        .watches(
            Api::<Secret>::all(client.clone()),
            managed,
            source_of::<Secret>,
        )
        .watches(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
            move |_: Namespace| targeting_all(&sources),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((o, _)) => info!("ClusterConfig '{}' reconciled", o.name),
                Err(e) => error!("Controller error: {}", e),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(source: Arc<ClusterConfig>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = source
        .namespace()
        .ok_or(Error::MissingMetadata("namespace"))?;
    ctx.reconcile(&source.name_any(), &namespace).await
}

fn error_policy(source: Arc<ClusterConfig>, error: &Error, ctx: Arc<Context>) -> Action {
    ctx.error_policy(&source, error)
}

/// Routes a labelled artifact notification back to the ClusterConfig that produced it.
fn source_of<A: Resource>(artifact: A) -> Option<ObjectRef<ClusterConfig>> {
    let (name, namespace) = owner_of(&artifact)?;
    Some(ObjectRef::new(&name).within(&namespace))
}

/// Every known ClusterConfig using the `all` sentinel, so a new namespace gets its artifact.
fn targeting_all(sources: &Store<ClusterConfig>) -> Vec<ObjectRef<ClusterConfig>> {
    sources
        .state()
        .into_iter()
        .filter(|cc| cc.targets_all())
        .map(|cc| ObjectRef::from_obj(&*cc))
        .collect()
}
