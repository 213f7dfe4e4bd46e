use crate::{
    k8s::{EnvVar, FeatureFlagSourceSpec, ResourceRequirements, Source},
    source::{Declared, Provider, UnknownProvider},
};

pub const DEFAULT_IMAGE: &str = "ghcr.io/open-feature/flagd";
pub const DEFAULT_TAG: &str = "v0.12.4";
pub const DEFAULT_MANAGEMENT_PORT: u16 = 8014;
pub const DEFAULT_PORT: u16 = 8013;
pub const DEFAULT_ENV_VAR_PREFIX: &str = "FLAGD";

/// Process-wide sidecar settings, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Defaults {
    pub management_port: u16,
    pub port: u16,
    pub socket_path: String,
    pub evaluator: String,
    pub image: String,
    pub tag: String,
    pub provider_args: Vec<String>,
    pub env_var_prefix: String,
    pub default_sync_provider: String,
    pub log_format: String,
    pub probes_enabled: bool,
}

/// The effective sidecar configuration for a single admission request.
///
/// Built from [`Defaults`] and then overlaid, in order, by every
/// `FeatureFlagSource` the pod references. Boolean switches are
/// three-valued: `None` means no layer has expressed an opinion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlagdConfig {
    pub management_port: u16,
    pub port: u16,
    pub socket_path: String,
    pub evaluator: String,
    pub image: String,
    pub tag: String,
    pub sources: Vec<Source>,
    pub env_vars: Vec<EnvVar>,
    pub sync_provider_args: Vec<String>,
    pub default_sync_provider: String,
    pub log_format: String,
    pub env_var_prefix: String,
    pub rollout_on_change: Option<bool>,
    pub probes_enabled: Option<bool>,
    pub debug_logging: Option<bool>,
    pub otel_collector_uri: String,
    pub resources: ResourceRequirements,
}

// === impl Defaults ===

impl Default for Defaults {
    fn default() -> Self {
        Self {
            management_port: DEFAULT_MANAGEMENT_PORT,
            port: DEFAULT_PORT,
            socket_path: String::new(),
            evaluator: "json".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            tag: DEFAULT_TAG.to_string(),
            provider_args: Vec::new(),
            env_var_prefix: DEFAULT_ENV_VAR_PREFIX.to_string(),
            default_sync_provider: Provider::Kubernetes.to_string(),
            log_format: "json".to_string(),
            probes_enabled: true,
        }
    }
}

// === impl FlagdConfig ===

impl FlagdConfig {
    pub fn new(defaults: &Defaults) -> Self {
        Self {
            management_port: defaults.management_port,
            port: defaults.port,
            socket_path: defaults.socket_path.clone(),
            evaluator: defaults.evaluator.clone(),
            image: defaults.image.clone(),
            tag: defaults.tag.clone(),
            sources: Vec::new(),
            env_vars: Vec::new(),
            sync_provider_args: defaults.provider_args.clone(),
            default_sync_provider: defaults.default_sync_provider.clone(),
            log_format: defaults.log_format.clone(),
            env_var_prefix: defaults.env_var_prefix.clone(),
            rollout_on_change: None,
            probes_enabled: Some(defaults.probes_enabled),
            debug_logging: None,
            otel_collector_uri: String::new(),
            resources: ResourceRequirements::default(),
        }
    }

    /// Overlays `overlay` onto this configuration.
    ///
    /// Set scalars replace ours; lists are appended after ours. A `None`
    /// overlay leaves the configuration untouched.
    pub fn merge(&mut self, overlay: Option<&FeatureFlagSourceSpec>) {
        let Some(overlay) = overlay else {
            return;
        };

        self.merge_scalars(overlay);
        self.sources.extend(overlay.sources.iter().cloned());
        self.env_vars.extend(overlay.env_vars.iter().cloned());
        self.sync_provider_args
            .extend(overlay.sync_provider_args.iter().cloned());
    }

    /// Overlays a configuration referenced through the deprecated
    /// single-resource annotation.
    ///
    /// Identical to [`FlagdConfig::merge`] except for environment variables,
    /// which are keyed by name: a later value overwrites an earlier one in
    /// place.
    pub fn merge_legacy(&mut self, overlay: Option<&FeatureFlagSourceSpec>) {
        let Some(overlay) = overlay else {
            return;
        };

        self.merge_scalars(overlay);
        self.sources.extend(overlay.sources.iter().cloned());
        self.sync_provider_args
            .extend(overlay.sync_provider_args.iter().cloned());
        for var in &overlay.env_vars {
            match self.env_vars.iter_mut().find(|v| v.name == var.name) {
                Some(existing) => *existing = var.clone(),
                None => self.env_vars.push(var.clone()),
            }
        }
    }

    fn merge_scalars(&mut self, overlay: &FeatureFlagSourceSpec) {
        fn port(dst: &mut u16, src: Option<u16>) {
            if let Some(p) = src.filter(|p| *p != 0) {
                *dst = p;
            }
        }

        fn string(dst: &mut String, src: &Option<String>) {
            if let Some(s) = src.as_deref().filter(|s| !s.is_empty()) {
                *dst = s.to_string();
            }
        }

        fn flag(dst: &mut Option<bool>, src: Option<bool>) {
            if src.is_some() {
                *dst = src;
            }
        }

        port(&mut self.management_port, overlay.management_port);
        port(&mut self.port, overlay.port);
        string(&mut self.socket_path, &overlay.socket_path);
        string(&mut self.evaluator, &overlay.evaluator);
        string(&mut self.image, &overlay.image);
        string(&mut self.tag, &overlay.tag);
        string(&mut self.default_sync_provider, &overlay.default_sync_provider);
        string(&mut self.log_format, &overlay.log_format);
        string(&mut self.env_var_prefix, &overlay.env_var_prefix);
        string(&mut self.otel_collector_uri, &overlay.otel_collector_uri);
        flag(&mut self.rollout_on_change, overlay.rollout_on_change);
        flag(&mut self.probes_enabled, overlay.probes_enabled);
        flag(&mut self.debug_logging, overlay.debug_logging);
        if let Some(resources) = overlay.resources.as_ref() {
            self.resources = resources.clone();
        }
    }

    /// Pairs every source with its provider, substituting the default
    /// provider where a source names none.
    pub fn declared_sources(&self) -> Result<Vec<Declared>, UnknownProvider> {
        self.sources
            .iter()
            .map(|source| {
                let provider = match source.provider.as_deref() {
                    None | Some("") => self.default_sync_provider.parse::<Provider>()?,
                    Some(p) => p.parse()?,
                };
                Ok(Declared {
                    provider,
                    source: source.clone(),
                })
            })
            .collect()
    }

    /// Probes stay on unless some layer disabled them explicitly.
    pub fn probes_enabled(&self) -> bool {
        self.probes_enabled != Some(false)
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging == Some(true)
    }

    pub fn image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Derives the sidecar's environment from the merged configuration.
    ///
    /// Settings at their zero value are left out so flagd applies its own
    /// defaults. User-supplied variables follow, with the prefix applied to
    /// their names.
    pub fn env_vars(&self) -> Vec<EnvVar> {
        let mut env = Vec::new();
        let mut push = |key: &str, value: String| {
            env.push(EnvVar {
                name: self.env_key(key),
                value: Some(value),
                value_from: None,
            })
        };

        if self.management_port != 0 {
            push("MANAGEMENT_PORT", self.management_port.to_string());
        }
        if self.port != 0 {
            push("PORT", self.port.to_string());
        }
        if !self.evaluator.is_empty() {
            push("EVALUATOR", self.evaluator.clone());
        }
        if !self.socket_path.is_empty() {
            push("SOCKET_PATH", self.socket_path.clone());
        }
        if !self.log_format.is_empty() {
            push("LOG_FORMAT", self.log_format.clone());
        }
        if !self.otel_collector_uri.is_empty() {
            push("OTEL_COLLECTOR_URI", self.otel_collector_uri.clone());
        }

        // A user variable replaces a derived one of the same name in place, so
        // the sidecar and the application containers see a single value.
        for var in &self.env_vars {
            let var = EnvVar {
                name: self.env_key(&var.name),
                ..var.clone()
            };
            match env.iter_mut().find(|v| v.name == var.name) {
                Some(existing) => *existing = var,
                None => env.push(var),
            }
        }
        env
    }

    fn env_key(&self, key: &str) -> String {
        if self.env_var_prefix.is_empty() {
            return key.to_string();
        }
        format!("{}_{}", self.env_var_prefix, key)
    }
}
