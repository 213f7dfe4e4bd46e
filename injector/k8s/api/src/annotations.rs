//! Pod annotations read and written by the injector.

/// Enables injection when set to `true` or `enabled`.
pub const ENABLED: &str = "openfeature.dev/enabled";

/// Deprecated spelling of [`ENABLED`]. Only consulted when [`ENABLED`] is
/// absent.
pub const LEGACY_ENABLED: &str = "openfeature.dev";

/// Comma-separated `[namespace/]name` references to `FeatureFlagSource`
/// objects, merged in order.
pub const FEATURE_FLAG_SOURCE: &str = "openfeature.dev/featureflagsource";

/// Deprecated single `FeatureFlagSource` reference.
pub const LEGACY_FLAG_SOURCE_CONFIGURATION: &str = "openfeature.dev/flagsourceconfiguration";

/// Deprecated comma-separated `FeatureFlag` references, each becoming a
/// source with the default provider.
pub const LEGACY_FEATURE_FLAG_CONFIGURATION: &str = "openfeature.dev/featureflagconfiguration";

/// Marks a pod whose service account must be bound for kubernetes sync.
pub const ALLOW_KUBERNETES_SYNC: &str = "openfeature.dev/allowkubernetessync";

/// Returns true if the annotation value enables injection.
pub fn is_enabled_value(value: &str) -> bool {
    matches!(value, "true" | "enabled")
}
