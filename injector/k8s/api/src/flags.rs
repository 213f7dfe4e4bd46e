use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A set of feature flags, consumed by flagd through one of its sync
/// providers.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.openfeature.dev",
    version = "v1beta1",
    kind = "FeatureFlag",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagSpec {
    pub flag_spec: FlagSpec,
}

/// The flag document written, verbatim, into materialized config maps.
///
/// Flag bodies are opaque here; their content is validated elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct FlagSpec {
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,

    #[serde(rename = "$evaluators", skip_serializing_if = "Option::is_none")]
    pub evaluators: Option<serde_json::Value>,
}

/// Configures the flagd sidecar injected into annotated pods.
///
/// Every field is optional: unset fields fall back to the injector's process
/// defaults or to the value set by an earlier source in the annotation.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.openfeature.dev",
    version = "v1beta1",
    kind = "FeatureFlagSource",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagSourceSpec {
    /// Port of flagd's management (metrics and health) endpoint.
    pub management_port: Option<u16>,

    /// Port of flagd's evaluation service.
    pub port: Option<u16>,

    /// Unix socket flagd listens on, in addition to `port`.
    pub socket_path: Option<String>,

    pub evaluator: Option<String>,

    pub image: Option<String>,

    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,

    /// Extra variables for the sidecar. Names are prefixed with
    /// `envVarPrefix`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_provider_args: Vec<String>,

    /// Provider used by sources that do not name one.
    pub default_sync_provider: Option<String>,

    pub log_format: Option<String>,

    pub env_var_prefix: Option<String>,

    pub rollout_on_change: Option<bool>,

    pub probes_enabled: Option<bool>,

    pub debug_logging: Option<bool>,

    pub otel_collector_uri: Option<String>,

    pub resources: Option<ResourceRequirements>,
}

/// Declares where flagd reads flags from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// A `[namespace/]name` reference for the kubernetes, filepath and
    /// flagd-proxy providers; an address for http and grpc.
    pub source: String,

    /// One of `kubernetes`, `filepath`, `http`, `grpc` or `flagd-proxy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_sync_bearer_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,

    #[serde(
        default,
        rename = "providerID",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Poll interval, in seconds, for http sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}
