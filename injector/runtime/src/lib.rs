#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use flagd_injector_core as core;
pub use flagd_injector_k8s_api as k8s;

mod admission;
mod args;
mod backfill;
mod grant;
mod metrics;
mod proxy;
mod resolve;
mod store;

pub use self::args::Args;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Set once the startup permission backfill has finished.
///
/// Cloned handles observe the same cell. There is a single writer.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

// === impl Readiness ===

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }
}
