use crate::{
    k8s::{ClusterRoleBinding, ServiceAccount, Subject},
    store::{Store, StoreError},
};
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Replacing the binding is attempted this many times before contention is
/// reported.
const MAX_ATTEMPTS: usize = 3;

/// Adds service accounts to the cluster role binding that lets flagd read
/// `FeatureFlag` objects.
#[derive(Clone, Debug)]
pub struct Grantor<S> {
    store: S,
    binding: String,
}

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("service account {namespace}/{name} not found")]
    ServiceAccountNotFound { namespace: String, name: String },

    #[error("cluster role binding {0} not found")]
    BindingNotFound(String),

    #[error("cluster role binding {binding} was modified concurrently {attempts} times")]
    Contention { binding: String, attempts: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<S: Store> Grantor<S> {
    pub fn new(store: S, binding: impl Into<String>) -> Self {
        Self {
            store,
            binding: binding.into(),
        }
    }

    /// Ensures `service_account` in `ns` is a subject of the binding. The
    /// namespace's `default` account is used when none is named.
    pub async fn grant(&self, ns: &str, service_account: Option<&str>) -> Result<(), GrantError> {
        let name = service_account
            .filter(|sa| !sa.is_empty())
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT);

        if self
            .store
            .get::<ServiceAccount>(Some(ns), name)
            .await?
            .is_none()
        {
            return Err(GrantError::ServiceAccountNotFound {
                namespace: ns.to_string(),
                name: name.to_string(),
            });
        }

        let subject = Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(ns.to_string()),
            api_group: None,
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let mut binding = self
                .store
                .get::<ClusterRoleBinding>(None, &self.binding)
                .await?
                .ok_or_else(|| GrantError::BindingNotFound(self.binding.clone()))?;

            let subjects = binding.subjects.get_or_insert_with(Vec::new);
            if subjects.iter().any(|s| same_subject(s, &subject)) {
                debug!(%ns, service_account = %name, "Already bound");
                return Ok(());
            }
            subjects.push(subject.clone());

            match self.store.replace(&binding).await {
                Ok(_) => {
                    info!(%ns, service_account = %name, binding = %self.binding, "Bound service account");
                    return Ok(());
                }
                Err(error) if error.is_conflict() => {
                    debug!(%error, attempt, "Binding changed; retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(GrantError::Contention {
            binding: self.binding.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

fn same_subject(a: &Subject, b: &Subject) -> bool {
    a.kind == b.kind && a.name == b.name && a.namespace == b.namespace
}
