use crate::{
    core::proxy::{self, ProxyReadiness},
    k8s::Deployment,
    store::{Store, StoreError},
};
use std::time::SystemTime;

/// Locates the shared flagd-proxy deployment and the service that fronts it.
#[derive(Clone, Debug)]
pub struct ProxyTarget {
    pub namespace: String,
    pub deployment: String,
    pub service: String,
    pub port: u16,
}

/// Observes the flagd-proxy deployment's readiness.
#[derive(Clone, Debug)]
pub struct Prober<S> {
    store: S,
    target: ProxyTarget,
}

// === impl ProxyTarget ===

impl ProxyTarget {
    /// The cluster-local address sidecars sync from.
    pub fn uri(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local:{}",
            self.service, self.namespace, self.port
        )
    }
}

// === impl Prober ===

impl<S: Store> Prober<S> {
    pub fn new(store: S, target: ProxyTarget) -> Self {
        Self { store, target }
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// Reads the deployment once; nothing is cached between calls.
    pub async fn probe(&self) -> Result<ProxyReadiness, StoreError> {
        let deployment = self
            .store
            .get::<Deployment>(Some(&self.target.namespace), &self.target.deployment)
            .await?;
        Ok(proxy::readiness(deployment.as_ref(), SystemTime::now()))
    }
}
