//! Wiring surface for the gantry binary and its feature tests.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use gantry_core::{Dag, DagObserver, NamespacedName};
pub use gantry_k8s_api as k8s;
pub use gantry_k8s_index::{Builder, Dispatcher, KubernetesCache, SharedCache};
pub use gantry_k8s_status as status;
pub use gantry_xds as xds;
