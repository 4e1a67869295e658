use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("store request failed: {0}")]
    Store(#[source] kube::Error),

    #[error("{kind} '{name}' in namespace '{namespace}' belongs to ClusterConfig '{owner}'")]
    Foreign {
        kind: &'static str,
        name: String,
        namespace: String,
        owner: String,
    },

    #[error("ClusterConfig is missing metadata.{0}")]
    MissingMetadata(&'static str),

    #[error("unable to encode status: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Maps a 404 from the API server to [`Error::NotFound`], anything else to [`Error::Store`].
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(ref e) if e.code == 404 => Error::NotFound {
                kind,
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            },
            e => Error::Store(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
