#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod owner;
pub mod proxy;
pub mod sidecar;
pub mod source;

pub use self::{
    config::{Defaults, FlagdConfig},
    owner::OwnerSet,
    proxy::ProxyReadiness,
    sidecar::Sidecar,
    source::{FileMount, ObjectRef, Provider, ResolvedSource, SyncProvider},
};
pub use flagd_injector_k8s_api as k8s;
