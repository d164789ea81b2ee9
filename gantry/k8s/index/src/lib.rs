//! Watch-driven indexing for gantry.
//!
//! All watched objects funnel into a single [`KubernetesCache`] guarded by
//! one lock; the [`Dispatcher`] is the only rebuild path, so DAG builds
//! always observe a consistent snapshot. The [`dag`] module is the compiler:
//! a pure function from a cache snapshot to the validated routing graph.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod dag;
pub mod dispatch;

pub use self::cache::{KubernetesCache, SharedCache};
pub use self::dag::Builder;
pub use self::dispatch::Dispatcher;
