use crate::k8s::Deployment;
use std::time::{Duration, SystemTime};

/// How long a proxy deployment may exist without a ready replica before it
/// is treated as failed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3 * 60);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProxyReadiness {
    /// No proxy deployment exists.
    Absent,
    /// The deployment has no ready replica but is within its grace period.
    NotReady,
    /// The deployment has had no ready replica for longer than the grace
    /// period.
    Expired,
    Ready,
}

/// Classifies the proxy deployment as observed at `now`.
pub fn readiness(deployment: Option<&Deployment>, now: SystemTime) -> ProxyReadiness {
    let Some(deployment) = deployment else {
        return ProxyReadiness::Absent;
    };

    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready > 0 {
        return ProxyReadiness::Ready;
    }

    let age = deployment
        .metadata
        .creation_timestamp
        .as_ref()
        .and_then(|t| now.duration_since(SystemTime::from(t.0)).ok())
        .unwrap_or_default();
    if age >= GRACE_PERIOD {
        return ProxyReadiness::Expired;
    }

    ProxyReadiness::NotReady
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    // 2024-01-01T00:00:00Z
    const CREATED: u64 = 1_704_067_200;

    fn deployment(ready: Option<i32>) -> Deployment {
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "flagd-proxy",
                "namespace": "open-feature-operator-system",
                "creationTimestamp": "2024-01-01T00:00:00Z",
            },
            "status": { "readyReplicas": ready },
        }))
        .expect("deployment must parse")
    }

    fn at(secs_after_creation: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(CREATED + secs_after_creation)
    }

    #[test]
    fn absent() {
        assert_eq!(readiness(None, at(0)), ProxyReadiness::Absent);
    }

    #[test]
    fn young_and_unready() {
        assert_eq!(readiness(Some(&deployment(None)), at(0)), ProxyReadiness::NotReady);
        assert_eq!(
            readiness(Some(&deployment(Some(0))), at(179)),
            ProxyReadiness::NotReady
        );
    }

    #[test]
    fn expires_at_grace_period() {
        assert_eq!(
            readiness(Some(&deployment(Some(0))), at(180)),
            ProxyReadiness::Expired
        );
        assert_eq!(
            readiness(Some(&deployment(None)), at(3600)),
            ProxyReadiness::Expired
        );
    }

    #[test]
    fn ready_regardless_of_age() {
        assert_eq!(readiness(Some(&deployment(Some(1))), at(0)), ProxyReadiness::Ready);
        assert_eq!(
            readiness(Some(&deployment(Some(2))), at(3600)),
            ProxyReadiness::Ready
        );
    }

    #[test]
    fn clock_skew_is_not_expiry() {
        let before_creation = UNIX_EPOCH + Duration::from_secs(CREATED - 60);
        assert_eq!(
            readiness(Some(&deployment(None)), before_creation),
            ProxyReadiness::NotReady
        );
    }
}
