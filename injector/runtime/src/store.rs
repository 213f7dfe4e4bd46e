//! Typed access to the cluster's object store.
//!
//! Writes carry the object's observed `resourceVersion`, so a write based on
//! a stale read fails with [`StoreError::Conflict`] instead of overwriting a
//! concurrent change.

use crate::k8s::{self, Api, Client, PostParams, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod fake;

/// A kind of object the injector reads or writes.
pub trait Object:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Builds an API handle; `ns` is ignored for cluster-scoped kinds.
    fn api(client: Client, ns: Option<&str>) -> Api<Self>;
}

#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Fetches an object, returning `None` if it does not exist.
    async fn get<K: Object>(&self, ns: Option<&str>, name: &str) -> Result<Option<K>, StoreError>;

    /// Lists objects in `ns`, or in all namespaces.
    async fn list<K: Object>(&self, ns: Option<&str>) -> Result<Vec<K>, StoreError>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError>;

    /// Replaces an object, failing if it changed since it was read.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} is missing a name")]
    MissingName { kind: String },

    #[error(transparent)]
    Api(#[from] k8s::Error),
}

/// A [`Store`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {$(
        impl Object for $ty {
            fn api(client: Client, ns: Option<&str>) -> Api<Self> {
                match ns {
                    Some(ns) => Api::namespaced(client, ns),
                    None => Api::all(client),
                }
            }
        }
    )+};
}

macro_rules! cluster_scoped {
    ($($ty:ty),+ $(,)?) => {$(
        impl Object for $ty {
            fn api(client: Client, _: Option<&str>) -> Api<Self> {
                Api::all(client)
            }
        }
    )+};
}

namespaced!(
    k8s::ConfigMap,
    k8s::Deployment,
    k8s::FeatureFlag,
    k8s::FeatureFlagSource,
    k8s::Pod,
    k8s::ServiceAccount,
);
cluster_scoped!(k8s::ClusterRoleBinding);

// === impl StoreError ===

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn from_write<K: Object>(error: k8s::Error, obj: &K, on_conflict: ConflictKind) -> Self {
        match error {
            k8s::Error::Api(rsp) if rsp.code == 409 || rsp.code == 404 => {
                let kind = kind_of::<K>();
                let name = obj.meta().name.clone().unwrap_or_default();
                match (rsp.code, on_conflict) {
                    (404, _) => Self::NotFound { kind, name },
                    (_, ConflictKind::Exists) => Self::AlreadyExists { kind, name },
                    (_, ConflictKind::Modified) => Self::Conflict { kind, name },
                }
            }
            error => Self::Api(error),
        }
    }
}

enum ConflictKind {
    Exists,
    Modified,
}

pub(crate) fn kind_of<K: Object>() -> String {
    K::kind(&()).into_owned()
}

fn name_of<K: Object>(obj: &K) -> Result<&str, StoreError> {
    obj.meta().name.as_deref().ok_or_else(|| StoreError::MissingName {
        kind: kind_of::<K>(),
    })
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, ns: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        let api = K::api(self.client.clone(), ns);
        Ok(api.get_opt(name).await?)
    }

    async fn list<K: Object>(&self, ns: Option<&str>) -> Result<Vec<K>, StoreError> {
        let api = K::api(self.client.clone(), ns);
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let api = K::api(self.client.clone(), obj.meta().namespace.as_deref());
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_write(e, obj, ConflictKind::Exists))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        let api = K::api(self.client.clone(), obj.meta().namespace.as_deref());
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_write(e, obj, ConflictKind::Modified))
    }
}
