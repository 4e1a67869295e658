//! Turns the raw `namespaceList` field into the set of namespaces to write to, and
//! diffs that set against the one recorded in status.

use std::collections::BTreeSet;

use crate::{Result, store::SourceStore};

/// Value of `namespaceList` that targets every namespace in the cluster.
pub const ALL_NAMESPACES: &str = "all";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetSet {
    /// Sorted namespace names.
    pub namespaces: Vec<String>,
    /// Whether the set came from expanding the `all` sentinel.
    pub all: bool,
}

/// Strips whitespace, splits on `,` and sorts.
///
/// Empty or repeated entries are passed through untouched; an empty field yields `[""]`,
/// which the API server later rejects as an invalid namespace.
pub fn parse(raw: &str) -> Vec<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut namespaces: Vec<String> = stripped.split(',').map(str::to_owned).collect();
    namespaces.sort();
    namespaces
}

pub fn is_all(parsed: &[String]) -> bool {
    matches!(parsed, [only] if only == ALL_NAMESPACES)
}

/// Resolves `namespaceList` against the cluster. The namespace listing is fetched on
/// every call when the sentinel is used.
pub async fn resolve<S>(raw: &str, store: &S) -> Result<TargetSet>
where
    S: SourceStore + ?Sized,
{
    let parsed = parse(raw);
    if !is_all(&parsed) {
        return Ok(TargetSet {
            namespaces: parsed,
            all: false,
        });
    }

    let mut namespaces = store.list_namespaces().await?;
    namespaces.sort();
    Ok(TargetSet {
        namespaces,
        all: true,
    })
}

/// Namespaces in `last_synced` that are no longer targeted, in `last_synced` order.
pub fn prune(target: &[String], last_synced: &[String]) -> Vec<String> {
    let target: BTreeSet<&str> = target.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();

    last_synced
        .iter()
        .filter(|ns| !target.contains(ns.as_str()))
        .filter(|ns| seen.insert(ns.as_str()))
        .cloned()
        .collect()
}

/// Namespaces in `target` that were not part of the last synchronisation.
pub fn additions(target: &[String], last_synced: &[String]) -> Vec<String> {
    prune(last_synced, target)
}
