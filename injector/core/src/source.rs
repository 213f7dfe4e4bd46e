use crate::k8s::Source;
use serde::Serialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Mount root for flag files materialized from config maps.
pub const FILE_MOUNT_ROOT: &str = "/etc/flagd";

/// Prefix of pod volumes the injector adds, so they never collide with the
/// pod's own volumes.
pub const VOLUME_PREFIX: &str = "flagd-";

/// The origin of a declared source, as named in a `FeatureFlagSource`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    Kubernetes,
    FilePath,
    Http,
    Grpc,
    FlagdProxy,
}

/// The transport flagd uses for a resolved source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProvider {
    Kubernetes,
    File,
    Http,
    Grpc,
}

/// A source paired with the provider it resolves through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declared {
    pub provider: Provider,
    pub source: Source,
}

/// One entry of flagd's `--sources` argument.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub uri: String,
    pub provider: SyncProvider,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,

    #[serde(rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

/// A `namespace/name` reference to a namespaced object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

/// A config map holding a flag file, mounted into the sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMount {
    pub volume: String,
    pub config_map: String,
    pub key: String,
    pub mount_path: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported sync provider: {0}")]
pub struct UnknownProvider(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object reference {0:?}: expected [namespace/]name")]
pub struct InvalidReference(pub String);

// === impl Provider ===

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" => Ok(Self::Kubernetes),
            "filepath" => Ok(Self::FilePath),
            "http" => Ok(Self::Http),
            "grpc" => Ok(Self::Grpc),
            "flagd-proxy" => Ok(Self::FlagdProxy),
            s => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kubernetes => "kubernetes",
            Self::FilePath => "filepath",
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::FlagdProxy => "flagd-proxy",
        })
    }
}

// === impl ResolvedSource ===

impl ResolvedSource {
    pub fn new(uri: impl Into<String>, provider: SyncProvider) -> Self {
        Self {
            uri: uri.into(),
            provider,
            bearer_token: None,
            tls: None,
            cert_path: None,
            provider_id: None,
            selector: None,
            interval: None,
        }
    }

    /// Builds an http source, carrying over its bearer token and poll
    /// interval.
    pub fn http(source: &Source) -> Self {
        Self {
            bearer_token: source.http_sync_bearer_token.clone(),
            interval: source.interval,
            ..Self::new(source.source.clone(), SyncProvider::Http)
        }
    }

    /// Builds a grpc source, carrying over its transport settings.
    pub fn grpc(source: &Source) -> Self {
        Self {
            tls: source.tls,
            cert_path: source.cert_path.clone(),
            provider_id: source.provider_id.clone(),
            selector: source.selector.clone(),
            ..Self::new(source.source.clone(), SyncProvider::Grpc)
        }
    }
}

// === impl ObjectRef ===

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `[namespace/]name`, using `default_ns` for unqualified names.
    pub fn parse(s: &str, default_ns: &str) -> Result<Self, InvalidReference> {
        let s = s.trim();
        match s.split_once('/') {
            None if !s.is_empty() => Ok(Self::new(default_ns, s)),
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(InvalidReference(s.to_string())),
        }
    }

    /// Parses a comma-separated list of references, skipping empty entries.
    pub fn parse_list(s: &str, default_ns: &str) -> Result<Vec<Self>, InvalidReference> {
        s.split(',')
            .filter(|r| !r.trim().is_empty())
            .map(|r| Self::parse(r, default_ns))
            .collect()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl FileMount ===

impl FileMount {
    /// Names the config map, volume and mount for a flag; stable for a
    /// given reference so repeated admissions converge on the same objects.
    pub fn for_flag(flag: &ObjectRef) -> Self {
        let id = format!("{}_{}", flag.namespace, flag.name);
        Self {
            volume: format!("{VOLUME_PREFIX}{}-{}", flag.namespace, flag.name),
            config_map: format!("{}-{}", flag.namespace, flag.name),
            key: format!("{id}.flagd.json"),
            mount_path: format!("{FILE_MOUNT_ROOT}/{id}"),
        }
    }

    pub fn uri(&self) -> String {
        format!("{}/{}", self.mount_path, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_references() {
        assert_eq!(
            ObjectRef::parse("flags", "default"),
            Ok(ObjectRef::new("default", "flags"))
        );
        assert_eq!(
            ObjectRef::parse(" other/flags ", "default"),
            Ok(ObjectRef::new("other", "flags"))
        );
        for bad in ["", "/flags", "ns/", "a/b/c"] {
            assert!(ObjectRef::parse(bad, "default").is_err(), "{bad:?}");
        }
    }

    #[test]
    fn parses_reference_lists_in_order() {
        let refs = ObjectRef::parse_list("b, other/a,,c", "ns").unwrap();
        assert_eq!(
            refs,
            vec![
                ObjectRef::new("ns", "b"),
                ObjectRef::new("other", "a"),
                ObjectRef::new("ns", "c"),
            ]
        );
    }

    #[test]
    fn provider_round_trips_through_display() {
        for p in [
            Provider::Kubernetes,
            Provider::FilePath,
            Provider::Http,
            Provider::Grpc,
            Provider::FlagdProxy,
        ] {
            assert_eq!(p.to_string().parse::<Provider>(), Ok(p));
        }
    }

    #[test]
    fn serializes_only_set_fields() {
        let src = ResolvedSource::new("ns/flags", SyncProvider::Kubernetes);
        assert_eq!(
            serde_json::to_string(&src).unwrap(),
            r#"{"uri":"ns/flags","provider":"kubernetes"}"#
        );

        let src = ResolvedSource::grpc(&Source {
            source: "flags:8013".to_string(),
            provider: Some("grpc".to_string()),
            tls: Some(true),
            provider_id: Some("pod-a".to_string()),
            selector: Some("app".to_string()),
            ..Default::default()
        });
        assert_eq!(
            serde_json::to_string(&src).unwrap(),
            r#"{"uri":"flags:8013","provider":"grpc","tls":true,"providerID":"pod-a","selector":"app"}"#
        );
    }

    #[test]
    fn file_mounts_are_deterministic() {
        let mount = FileMount::for_flag(&ObjectRef::new("ns", "flags"));
        assert_eq!(mount, FileMount::for_flag(&ObjectRef::new("ns", "flags")));
        assert_eq!(mount.config_map, "ns-flags");
        assert_eq!(mount.volume, "flagd-ns-flags");
        assert_eq!(mount.uri(), "/etc/flagd/ns_flags/ns_flags.flagd.json");
    }
}
