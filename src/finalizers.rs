//! Finalizer tokens on the ClusterConfig, one per namespace that may still hold an
//! artifact, or a single `all` token when targeting every namespace. Each change is
//! persisted on its own.

use tracing::debug;

use crate::{
    ClusterConfig, Result,
    namespaces::{ALL_NAMESPACES, TargetSet},
    store::SourceStore,
};

pub const ALL_TOKEN: &str = ALL_NAMESPACES;

/// Finalizers the API server or garbage collector may place on any object.
const BUILT_IN: [&str; 3] = ["foregroundDeletion", "orphan", "kubernetes"];

fn finalizers(source: &ClusterConfig) -> &[String] {
    source.metadata.finalizers.as_deref().unwrap_or_default()
}

pub fn has(source: &ClusterConfig, token: &str) -> bool {
    finalizers(source).iter().any(|f| f == token)
}

/// Tokens that should guard the given target set.
pub fn tokens(target: &TargetSet) -> Vec<String> {
    if target.all {
        vec![ALL_TOKEN.to_owned()]
    } else {
        target.namespaces.clone()
    }
}

/// Entries of `tokens` not yet present on `source`, without repeats.
pub fn missing(source: &ClusterConfig, tokens: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for token in tokens {
        if !has(source, token) && !missing.contains(token) {
            missing.push(token.clone());
        }
    }
    missing
}

/// Per-namespace tokens held on `source`. Domain qualified finalizers belong to other
/// controllers and are never reported.
pub fn held_namespace_tokens(source: &ClusterConfig) -> Vec<String> {
    finalizers(source)
        .iter()
        .filter(|f| f.as_str() != ALL_TOKEN)
        .filter(|f| !f.contains('/') && !BUILT_IN.contains(&f.as_str()))
        .cloned()
        .collect()
}

/// Adds `token` and persists the source. `source` is replaced with the stored copy.
pub async fn add<S>(store: &S, source: &mut ClusterConfig, token: &str) -> Result<()>
where
    S: SourceStore + ?Sized,
{
    if has(source, token) {
        return Ok(());
    }

    let mut updated = source.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(token.to_owned());

    *source = store.update_source(&updated).await?;
    debug!(token, "Added finalizer");
    Ok(())
}

/// Removes `token` and persists the source. `source` is replaced with the stored copy.
pub async fn remove<S>(store: &S, source: &mut ClusterConfig, token: &str) -> Result<()>
where
    S: SourceStore + ?Sized,
{
    if !has(source, token) {
        return Ok(());
    }

    let mut updated = source.clone();
    if let Some(finalizers) = updated.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != token);
    }

    *source = store.update_source(&updated).await?;
    debug!(token, "Removed finalizer");
    Ok(())
}
