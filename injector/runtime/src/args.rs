use crate::{
    admission::Admission,
    backfill,
    core::{config, Defaults, Provider},
    grant::Grantor,
    metrics::AdmissionMetrics,
    proxy::{Prober, ProxyTarget},
    resolve::Resolver,
    store::KubeStore,
    Readiness,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "flagd-injector", about = "Injects flagd sidecars into annotated pods")]
pub struct Args {
    #[clap(
        long,
        default_value = "flagd_injector=info,warn",
        env = "FLAGD_INJECTOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(flatten)]
    sidecar: SidecarArgs,

    /// Namespace the operator and its flagd-proxy run in.
    #[clap(
        long,
        env = "POD_NAMESPACE",
        default_value = "open-feature-operator-system"
    )]
    operator_namespace: String,

    /// Cluster role binding that grants flagd read access to flags.
    #[clap(long, default_value = "open-feature-operator-flagd-kubernetes-sync")]
    cluster_role_binding: String,

    #[clap(long, default_value = "flagd-proxy")]
    flagd_proxy_deployment: String,

    #[clap(long, default_value = "flagd-proxy-svc")]
    flagd_proxy_service: String,

    #[clap(long, default_value = "8015")]
    flagd_proxy_port: u16,

    /// Skips re-binding service accounts of existing pods at startup.
    #[clap(long)]
    backfill_disabled: bool,
}

/// Process-wide sidecar defaults, overridable per pod.
#[derive(Debug, clap::Args)]
struct SidecarArgs {
    #[clap(long = "sidecar-management-port", env = "SIDECAR_MANAGEMENT_PORT", default_value_t = config::DEFAULT_MANAGEMENT_PORT)]
    management_port: u16,

    #[clap(long = "sidecar-port", env = "SIDECAR_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    #[clap(long = "sidecar-socket-path", env = "SIDECAR_SOCKET_PATH", default_value = "")]
    socket_path: String,

    #[clap(long = "sidecar-image", env = "SIDECAR_IMAGE", default_value = config::DEFAULT_IMAGE)]
    image: String,

    #[clap(long = "sidecar-tag", env = "SIDECAR_TAG", default_value = config::DEFAULT_TAG)]
    tag: String,

    /// Comma-separated arguments passed to every sync provider.
    #[clap(
        long = "sidecar-provider-args",
        env = "SIDECAR_PROVIDER_ARGS",
        value_delimiter = ','
    )]
    provider_args: Vec<String>,

    #[clap(long = "sidecar-env-var-prefix", env = "SIDECAR_ENV_VAR_PREFIX", default_value = config::DEFAULT_ENV_VAR_PREFIX)]
    env_var_prefix: String,

    #[clap(long = "sidecar-evaluator", env = "SIDECAR_EVALUATOR", default_value = "json")]
    evaluator: String,

    #[clap(
        long = "sidecar-default-sync-provider",
        env = "SIDECAR_DEFAULT_SYNC_PROVIDER",
        default_value = "kubernetes"
    )]
    default_sync_provider: String,

    #[clap(long = "sidecar-log-format", env = "SIDECAR_LOG_FORMAT", default_value = "json")]
    log_format: String,

    #[clap(
        long = "sidecar-probes-enabled",
        env = "SIDECAR_PROBES_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    probes_enabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            sidecar,
            operator_namespace,
            cluster_role_binding,
            flagd_proxy_deployment,
            flagd_proxy_service,
            flagd_proxy_port,
            backfill_disabled,
        } = self;

        let defaults = Defaults::from(sidecar);
        // Reject an unusable default provider before serving anything.
        defaults
            .default_sync_provider
            .parse::<Provider>()?;

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        let store = KubeStore::new(runtime.client());
        let grantor = Grantor::new(store.clone(), cluster_role_binding);
        let prober = Prober::new(
            store.clone(),
            ProxyTarget {
                namespace: operator_namespace,
                deployment: flagd_proxy_deployment,
                service: flagd_proxy_service,
                port: flagd_proxy_port,
            },
        );
        let resolver = Resolver::new(store.clone(), grantor.clone(), prober);

        let readiness = Readiness::default();
        if backfill_disabled {
            info!("Permission backfill disabled");
            readiness.mark_ready();
        } else {
            tokio::spawn(
                backfill::run(store.clone(), grantor, readiness.clone())
                    .instrument(info_span!("backfill")),
            );
        }

        let admission = Admission::new(store, resolver, defaults, readiness, metrics);
        let runtime = runtime.spawn_server(admission);

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

impl From<SidecarArgs> for Defaults {
    fn from(args: SidecarArgs) -> Self {
        let SidecarArgs {
            management_port,
            port,
            socket_path,
            image,
            tag,
            provider_args,
            env_var_prefix,
            evaluator,
            default_sync_provider,
            log_format,
            probes_enabled,
        } = args;
        Self {
            management_port,
            port,
            socket_path,
            evaluator,
            image,
            tag,
            provider_args,
            env_var_prefix,
            default_sync_provider,
            log_format,
            probes_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Parser)]
    struct Sidecar {
        #[clap(flatten)]
        sidecar: SidecarArgs,
    }

    fn parse(args: &[&str]) -> Defaults {
        let args = std::iter::once("test").chain(args.iter().copied());
        Sidecar::try_parse_from(args)
            .expect("arguments must parse")
            .sidecar
            .into()
    }

    #[test]
    fn defaults_match_core() {
        assert_eq!(parse(&[]), Defaults::default());
    }

    #[test]
    fn overrides() {
        let defaults = parse(&[
            "--sidecar-port=9090",
            "--sidecar-tag=v1.0.0",
            "--sidecar-provider-args=a=1,b=2",
            "--sidecar-probes-enabled=false",
        ]);
        assert_eq!(defaults.port, 9090);
        assert_eq!(defaults.tag, "v1.0.0");
        assert_eq!(defaults.provider_args, ["a=1", "b=2"]);
        assert!(!defaults.probes_enabled);
    }

    #[test]
    fn rejects_malformed_values() {
        let args = ["test", "--sidecar-management-port=eighty"];
        assert!(Sidecar::try_parse_from(args).is_err());
        let args = ["test", "--sidecar-probes-enabled=maybe"];
        assert!(Sidecar::try_parse_from(args).is_err());
    }
}
