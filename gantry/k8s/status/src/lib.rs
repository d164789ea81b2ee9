//! Publishes per-object validity verdicts back to the cluster.
//!
//! The [`Index`] consumes verdicts from each DAG rebuild, keeps the most
//! recent verdict per object, and forwards only changes to the
//! [`Controller`], which PATCHes the HTTPProxy status subresource. Verdict
//! publication is fully asynchronous; a slow or failing API server never
//! stalls a rebuild.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;

pub use self::index::{Controller, Index, Update};
