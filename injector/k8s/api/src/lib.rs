#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod flags;

pub use self::flags::{
    FeatureFlag, FeatureFlagSource, FeatureFlagSourceSpec, FeatureFlagSpec, FlagSpec, Source,
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        core::v1::{
            ConfigMap, Container, EnvVar, Pod, PodSpec, ResourceRequirements, ServiceAccount,
            Volume, VolumeMount,
        },
        rbac::v1::{ClusterRoleBinding, Subject},
    },
    apimachinery::{
        self,
        pkg::apis::meta::v1::{OwnerReference, Time},
    },
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, PostParams, Resource, ResourceExt},
    Client, Error,
};
