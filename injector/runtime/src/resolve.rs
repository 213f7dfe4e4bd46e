//! Turns the sources a pod declares into flagd `--sources` entries.
//!
//! Some providers touch the cluster while resolving: kubernetes sources bind
//! the pod's service account, filepath sources materialize a config map, and
//! flagd-proxy sources require the proxy to be serving. A failure aborts the
//! whole resolution so that a pod is never injected with a partial set of
//! sources.

use crate::{
    core::{
        owner::{self, OwnerSet},
        source::{Declared, InvalidReference, UnknownProvider},
        FileMount, FlagdConfig, ObjectRef, Provider, ProxyReadiness, ResolvedSource,
        SyncProvider,
    },
    grant::{GrantError, Grantor},
    k8s::{ConfigMap, FeatureFlag, ObjectMeta, OwnerReference, Source},
    proxy::Prober,
    store::{Store, StoreError},
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

const MAX_ATTEMPTS: usize = 3;

/// Prefix of the selector a flagd-proxy source subscribes with.
const PROXY_SELECTOR_PREFIX: &str = "core.openfeature.dev";

#[derive(Clone, Debug)]
pub struct Resolver<S> {
    store: S,
    grantor: Grantor<S>,
    prober: Prober<S>,
}

/// The pod being admitted, as far as resolution is concerned.
#[derive(Copy, Clone, Debug)]
pub struct PodRef<'a> {
    pub namespace: &'a str,
    pub service_account: Option<&'a str>,
    pub owners: &'a [OwnerReference],
}

/// Everything the sidecar needs from a successful resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    /// One entry per declared source, in declaration order.
    pub sources: Vec<ResolvedSource>,
    pub mounts: Vec<FileMount>,
    /// Set when any source syncs directly from the Kubernetes API.
    pub kubernetes_sync: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("FeatureFlag {0} not found")]
    FlagNotFound(ObjectRef),

    /// The proxy is missing or still starting. Admission should be retried
    /// later.
    #[error("flagd-proxy is not ready to serve ({0:?})")]
    ProxyNotReady(ProxyReadiness),

    #[error("flagd-proxy has had no ready replica for longer than its grace period")]
    ProxyExpired,

    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),

    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),

    #[error("failed to bind service account: {0}")]
    Grant(#[from] GrantError),

    #[error("failed to encode flags for {flag}: {source}")]
    Encode {
        flag: ObjectRef,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// === impl ResolveError ===

impl ResolveError {
    /// True if admission may succeed later without a configuration change.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::ProxyNotReady(_))
    }
}

// === impl Resolver ===

impl<S: Store> Resolver<S> {
    pub fn new(store: S, grantor: Grantor<S>, prober: Prober<S>) -> Self {
        Self {
            store,
            grantor,
            prober,
        }
    }

    pub async fn resolve(
        &self,
        pod: PodRef<'_>,
        config: &FlagdConfig,
    ) -> Result<Resolution, ResolveError> {
        let mut resolution = Resolution::default();
        for Declared { provider, source } in config.declared_sources()? {
            let resolved = match provider {
                Provider::Kubernetes => {
                    let flag = self.kubernetes(pod, &source).await?;
                    if !resolution.kubernetes_sync {
                        self.grantor
                            .grant(pod.namespace, pod.service_account)
                            .await?;
                        resolution.kubernetes_sync = true;
                    }
                    ResolvedSource::new(flag.to_string(), SyncProvider::Kubernetes)
                }
                Provider::FilePath => {
                    let mount = self.file_path(pod, &source).await?;
                    let resolved = ResolvedSource::new(mount.uri(), SyncProvider::File);
                    resolution.mounts.push(mount);
                    resolved
                }
                Provider::Http => ResolvedSource::http(&source),
                Provider::Grpc => ResolvedSource::grpc(&source),
                Provider::FlagdProxy => self.flagd_proxy(pod, &source).await?,
            };
            debug!(%provider, uri = %resolved.uri, "Resolved source");
            resolution.sources.push(resolved);
        }
        Ok(resolution)
    }

    async fn flag(&self, flag: &ObjectRef) -> Result<FeatureFlag, ResolveError> {
        self.store
            .get::<FeatureFlag>(Some(&flag.namespace), &flag.name)
            .await?
            .ok_or_else(|| ResolveError::FlagNotFound(flag.clone()))
    }

    async fn kubernetes(
        &self,
        pod: PodRef<'_>,
        source: &Source,
    ) -> Result<ObjectRef, ResolveError> {
        let flag = ObjectRef::parse(&source.source, pod.namespace)?;
        self.flag(&flag).await?;
        Ok(flag)
    }

    /// Ensures the flag's config map exists in the pod's namespace and is
    /// owned by the pod's owner, so it lives as long as the workload does.
    async fn file_path(
        &self,
        pod: PodRef<'_>,
        source: &Source,
    ) -> Result<FileMount, ResolveError> {
        let flag = ObjectRef::parse(&source.source, pod.namespace)?;
        let mount = FileMount::for_flag(&flag);
        let owner = pod.owners.first().map(owner::non_controller);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self
                .store
                .get::<ConfigMap>(Some(pod.namespace), &mount.config_map)
                .await?
            {
                None => {
                    let cm = self.config_map(pod, &flag, &mount, owner.clone()).await?;
                    self.store.create(&cm).await.map(|_| {
                        info!(ns = %pod.namespace, name = %mount.config_map, %flag, "Created flag config map");
                    })
                }
                Some(mut cm) => {
                    let owners = cm.metadata.owner_references.get_or_insert_with(Vec::new);
                    match owner.as_ref() {
                        Some(owner) if !OwnerSet::new(owners).shares(&OwnerSet::new(pod.owners)) => {
                            owners.push(owner.clone());
                            self.store.replace(&cm).await.map(|_| {
                                debug!(ns = %pod.namespace, name = %mount.config_map, owner = %owner.name, "Added config map owner");
                            })
                        }
                        _ => Ok(()),
                    }
                }
            };

            match result {
                Ok(()) => return Ok(mount),
                Err(error @ (StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }))
                    if attempt < MAX_ATTEMPTS =>
                {
                    debug!(%error, attempt, "Config map changed; retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn config_map(
        &self,
        pod: PodRef<'_>,
        flag: &ObjectRef,
        mount: &FileMount,
        owner: Option<OwnerReference>,
    ) -> Result<ConfigMap, ResolveError> {
        let spec = self.flag(flag).await?.spec.flag_spec;
        let content = serde_json::to_string(&spec).map_err(|source| ResolveError::Encode {
            flag: flag.clone(),
            source,
        })?;

        Ok(ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(pod.namespace.to_string()),
                name: Some(mount.config_map.clone()),
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(mount.key.clone(), content)])),
            ..Default::default()
        })
    }

    async fn flagd_proxy(
        &self,
        pod: PodRef<'_>,
        source: &Source,
    ) -> Result<ResolvedSource, ResolveError> {
        match self.prober.probe().await? {
            ProxyReadiness::Ready => {}
            ProxyReadiness::Expired => return Err(ResolveError::ProxyExpired),
            state @ (ProxyReadiness::Absent | ProxyReadiness::NotReady) => {
                return Err(ResolveError::ProxyNotReady(state));
            }
        }

        let flag = ObjectRef::parse(&source.source, pod.namespace)?;
        Ok(ResolvedSource {
            selector: Some(format!(
                "{PROXY_SELECTOR_PREFIX}/{}/{}",
                flag.namespace, flag.name
            )),
            ..ResolvedSource::new(self.prober.target().uri(), SyncProvider::Grpc)
        })
    }
}
