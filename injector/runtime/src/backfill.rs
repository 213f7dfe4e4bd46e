use crate::{
    grant::Grantor,
    k8s::{annotations, Pod, ResourceExt},
    store::Store,
    Readiness,
};
use tracing::{info, warn};

/// Re-binds the service accounts of pods that were admitted with a
/// kubernetes source before this process started, then marks the injector
/// ready.
///
/// Pods that cannot be bound are logged and skipped. If pods cannot be
/// listed at all, nothing is re-bound; readiness is still set, since
/// admission itself grants access on each request.
pub async fn run<S: Store>(store: S, grantor: Grantor<S>, readiness: Readiness) {
    let pods = match store.list::<Pod>(None).await {
        Ok(pods) => pods,
        Err(error) => {
            warn!(%error, "Failed to list pods; skipping permission backfill");
            readiness.mark_ready();
            return;
        }
    };

    let mut bound = 0;
    for pod in pods.iter().filter(|p| needs_binding(p)) {
        let ns = pod.namespace().unwrap_or_default();
        let service_account = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.as_deref());
        match grantor.grant(&ns, service_account).await {
            Ok(()) => bound += 1,
            Err(error) => {
                warn!(%error, pod = %pod.name_any(), %ns, "Failed to bind service account");
            }
        }
    }

    info!(pods = bound, "Permission backfill complete");
    readiness.mark_ready();
}

fn needs_binding(pod: &Pod) -> bool {
    pod.annotations()
        .get(annotations::ALLOW_KUBERNETES_SYNC)
        .is_some_and(|v| v == "true")
}
