use crate::{
    core::{source::InvalidReference, Defaults, FlagdConfig, ObjectRef, Sidecar},
    k8s::{annotations, FeatureFlagSource, FeatureFlagSourceSpec, Pod, ResourceExt, Source},
    metrics::{AdmissionMetrics, Outcome},
    resolve::{PodRef, ResolveError, Resolver},
    store::{Store, StoreError},
    Readiness,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::admission::SerializePatchError;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Mutates annotated pods to run a flagd sidecar.
#[derive(Clone)]
pub struct Admission<S> {
    store: S,
    resolver: Resolver<S>,
    defaults: Arc<Defaults>,
    readiness: Readiness,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures building the pod's flagd configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FeatureFlagSource {0} not found")]
    SourceNotFound(ObjectRef),

    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
enum InjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to encode sidecar sources: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("failed to encode pod: {0}")]
    Pod(#[source] serde_json::Error),

    #[error("failed to encode patch: {0}")]
    Patch(#[from] SerializePatchError),
}

type Review = kube::core::admission::AdmissionReview<Pod>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<Pod>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<kube::core::DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<S: Store> tower::Service<Request<hyper::body::Incoming>> for Admission<S> {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        match (req.method(), req.uri().path()) {
            (&http::Method::POST, "/") => {}
            (&http::Method::GET, "/ready") => {
                return Box::pin(future::ok(self.ready_response()));
            }
            _ => {
                return Box::pin(future::ok(
                    Response::builder()
                        .status(http::StatusCode::NOT_FOUND)
                        .body(Body::default())
                        .expect("not found response must be valid"),
                ));
            }
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => admission.admit(req).await,
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(allowed = rsp.allowed, patched = rsp.patch.is_some());
            json_response(rsp.into_review())
        })
    }
}

impl<S: Store> Admission<S> {
    pub fn new(
        store: S,
        resolver: Resolver<S>,
        defaults: Defaults,
        readiness: Readiness,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            store,
            resolver,
            defaults: Arc::new(defaults),
            readiness,
            metrics,
        }
    }

    fn ready_response(&self) -> Response<Body> {
        let status = if self.readiness.is_ready() {
            http::StatusCode::OK
        } else {
            http::StatusCode::SERVICE_UNAVAILABLE
        };
        Response::builder()
            .status(status)
            .body(Body::default())
            .expect("ready response must be valid")
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let Some(pod) = req.object else {
            self.metrics.observe(Outcome::Errored);
            return errored(rsp, "admission request missing 'object'");
        };

        if !injection_enabled(&pod) {
            trace!("Injection not requested");
            self.metrics.observe(Outcome::Skipped);
            return rsp;
        }

        // Pods created in a namespace may not carry it yet.
        let ns = req
            .namespace
            .or_else(|| pod.namespace())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .clone()
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();

        if pod.owner_references().is_empty() {
            info!(%ns, pod = %name, "Denied pod without owner references");
            self.metrics.observe(Outcome::Denied);
            return rsp.deny("pods without owner references are not injected with flagd");
        }

        match self.inject(&ns, pod, rsp.clone()).await {
            Ok(rsp) => {
                info!(%ns, pod = %name, "Injected flagd sidecar");
                self.metrics.observe(Outcome::Injected);
                rsp
            }
            Err(InjectError::Resolve(error)) if error.is_deferred() => {
                info!(%error, %ns, pod = %name, "Deferred injection");
                self.metrics.observe(Outcome::Denied);
                rsp.deny(error)
            }
            Err(error) => {
                warn!(%error, %ns, pod = %name, "Failed to inject flagd sidecar");
                self.metrics.observe(Outcome::Errored);
                errored(rsp, error)
            }
        }
    }

    async fn inject(
        &self,
        ns: &str,
        pod: Pod,
        rsp: AdmissionResponse,
    ) -> Result<AdmissionResponse, InjectError> {
        let config = self.config(ns, &pod).await?;
        let pod_ref = PodRef {
            namespace: ns,
            service_account: pod
                .spec
                .as_ref()
                .and_then(|spec| spec.service_account_name.as_deref()),
            owners: pod.owner_references(),
        };
        let resolution = self.resolver.resolve(pod_ref, &config).await?;
        let sidecar = Sidecar::new(&config, &resolution.sources, &resolution.mounts)?;

        let mut mutated = pod.clone();
        if resolution.kubernetes_sync {
            mutated.annotations_mut().insert(
                annotations::ALLOW_KUBERNETES_SYNC.to_string(),
                "true".to_string(),
            );
        }
        sidecar.inject(mutated.spec.get_or_insert_with(Default::default));

        let encode = |pod: &Pod| serde_json::to_value(pod).map_err(InjectError::Pod);
        let patch = json_patch::diff(&encode(&pod)?, &encode(&mutated)?);
        debug!(?patch);
        Ok(rsp.with_patch(patch)?)
    }

    /// Builds the pod's configuration: process defaults, then the deprecated
    /// annotations, then each referenced `FeatureFlagSource` in order.
    async fn config(&self, ns: &str, pod: &Pod) -> Result<FlagdConfig, ConfigError> {
        let values = pod.annotations();
        let mut config = FlagdConfig::new(&self.defaults);

        if let Some(reference) = values.get(annotations::LEGACY_FLAG_SOURCE_CONFIGURATION) {
            let reference = ObjectRef::parse(reference, ns)?;
            config.merge_legacy(Some(&self.flag_source(&reference).await?));
        }

        if let Some(flags) = values.get(annotations::LEGACY_FEATURE_FLAG_CONFIGURATION) {
            for flag in ObjectRef::parse_list(flags, ns)? {
                config.sources.push(Source {
                    source: flag.to_string(),
                    ..Default::default()
                });
            }
        }

        if let Some(sources) = values.get(annotations::FEATURE_FLAG_SOURCE) {
            for reference in ObjectRef::parse_list(sources, ns)? {
                config.merge(Some(&self.flag_source(&reference).await?));
            }
        }

        Ok(config)
    }

    async fn flag_source(
        &self,
        reference: &ObjectRef,
    ) -> Result<FeatureFlagSourceSpec, ConfigError> {
        self.store
            .get::<FeatureFlagSource>(Some(&reference.namespace), &reference.name)
            .await?
            .map(|source| source.spec)
            .ok_or_else(|| ConfigError::SourceNotFound(reference.clone()))
    }
}

/// True if the pod opts in, checking the current annotation before the
/// deprecated one.
fn injection_enabled(pod: &Pod) -> bool {
    let values = pod.annotations();
    values
        .get(annotations::ENABLED)
        .or_else(|| values.get(annotations::LEGACY_ENABLED))
        .is_some_and(|v| annotations::is_enabled_value(v))
}

/// Rejects the request as a server-side failure, so the API server applies
/// the webhook's failure policy.
fn errored(rsp: AdmissionResponse, error: impl fmt::Display) -> AdmissionResponse {
    let mut rsp = rsp.deny(error);
    rsp.result.code = 500;
    rsp
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
